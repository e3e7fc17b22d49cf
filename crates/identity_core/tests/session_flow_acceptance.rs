use std::sync::Arc;

use futures::StreamExt;
use identity_core::{
    memory::{BackendOp, InMemoryIdentityBackend, InMemorySocialClient},
    IdentityStateMachine, SessionController, Settings, UnlinkPolicy,
};
use shared::{
    domain::{Credential, ProviderKind, SessionState},
    protocol::{SessionEvent, SessionIntent, SessionOutcome, UserMessage},
};

#[tokio::test]
async fn anonymous_user_links_deletes_and_signs_out_without_gaps() {
    let backend = InMemoryIdentityBackend::new();
    backend.push_anonymous_id("anon-1");
    backend.push_anonymous_id("anon-2");
    backend.push_anonymous_id("anon-3");
    let machine = IdentityStateMachine::new(backend.clone(), Settings::default());
    let mut states = machine.observe_session();

    assert_eq!(states.next().await, Some(SessionState::Unauthenticated));

    let anonymous = machine.ensure_identity().await.expect("provision");
    assert_eq!(anonymous.id.as_str(), "anon-1");
    let state = states.next().await.expect("anonymous state");
    assert!(state.is_anonymous());

    let linked = machine
        .link_with_credential(&Credential::email_password("me@example.com", "pw"))
        .await
        .expect("link");
    assert_eq!(linked.id, anonymous.id);
    let state = states.next().await.expect("linked state");
    assert!(state.is_authenticated());
    assert_eq!(state.identity().map(|i| i.id.as_str()), Some("anon-1"));

    let replacement = machine.delete_account().await.expect("delete");
    assert_eq!(replacement.id.as_str(), "anon-2");
    assert!(!backend.account_exists("anon-1"));
    let state = states.next().await.expect("post-delete state");
    assert_eq!(state.identity().map(|i| i.id.as_str()), Some("anon-2"));
    assert!(state.is_anonymous());

    let after_sign_out = machine.sign_out().await.expect("sign out");
    assert_eq!(after_sign_out.id.as_str(), "anon-3");
    assert!(!backend.account_exists("anon-2"));
    let state = states.next().await.expect("post-sign-out state");
    assert_eq!(state.identity().map(|i| i.id.as_str()), Some("anon-3"));

    drop(states);
    assert_eq!(backend.listener_count(), 0);
}

#[tokio::test]
async fn google_account_round_trip_through_the_controller() {
    let backend = InMemoryIdentityBackend::new();
    backend.register_external_token(ProviderKind::Google, "g-token", "g@example.com");
    let google = InMemorySocialClient::new(ProviderKind::Google);
    let settings = Settings {
        unlink_policy: UnlinkPolicy::Strict,
        ..Settings::default()
    };
    let machine =
        IdentityStateMachine::new(backend.clone(), settings).with_social_client(google.clone());
    let mut controller = SessionController::new(Arc::new(machine));
    let mut events = controller.subscribe_events();

    let outcome = controller
        .handle(SessionIntent::SocialSignIn {
            provider: ProviderKind::Google,
            token: "g-token".to_string(),
        })
        .await;
    assert_eq!(outcome, SessionOutcome::Ok);
    assert!(controller.open_protected_zone());

    assert_eq!(
        controller.handle(SessionIntent::DeleteAccount).await,
        SessionOutcome::Ok
    );
    assert_eq!(google.sign_out_count(), 1);
    assert_eq!(backend.call_count(BackendOp::DeleteCurrentAccount), 1);
    assert!(controller.session_state().is_anonymous());
    assert!(!controller.open_protected_zone());

    let mut saw_deleted = false;
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::Message(UserMessage::AccountDeleted) {
            saw_deleted = true;
        }
    }
    assert!(saw_deleted);
}
