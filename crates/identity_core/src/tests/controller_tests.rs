use shared::error::{BackendErrorKind, PolicyError};

use super::*;
use crate::{
    config::Settings,
    memory::{BackendOp, InMemoryIdentityBackend},
};

fn controller(backend: &Arc<InMemoryIdentityBackend>) -> SessionController {
    let machine = IdentityStateMachine::new(backend.clone(), Settings::default());
    SessionController::new(Arc::new(machine))
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn navigated_to_settings(events: &[SessionEvent]) -> bool {
    events.contains(&SessionEvent::Navigate {
        open: Route::Settings,
        pop_up: Route::Login,
    })
}

#[tokio::test]
async fn malformed_email_is_reported_without_backend_call() {
    let backend = InMemoryIdentityBackend::new();
    let mut controller = controller(&backend);
    let mut events = controller.subscribe_events();

    controller.on_email_change("user@@bad");
    controller.on_password_change("pw");
    let outcome = controller.on_sign_in_click().await;

    assert_eq!(
        outcome,
        SessionOutcome::ValidationError(ValidationError::InvalidEmail)
    );
    assert_eq!(backend.total_calls(), 0);
    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::Message(UserMessage::EmailError)));
    assert!(!navigated_to_settings(&events));
}

#[tokio::test]
async fn blank_password_is_reported_without_backend_call() {
    let backend = InMemoryIdentityBackend::new();
    let mut controller = controller(&backend);
    let mut events = controller.subscribe_events();

    controller.on_email_change("alice@example.com");
    controller.on_password_change("   ");
    let outcome = controller.on_sign_in_click().await;

    assert_eq!(
        outcome,
        SessionOutcome::ValidationError(ValidationError::EmptyPassword)
    );
    assert_eq!(backend.total_calls(), 0);
    assert!(drain(&mut events).contains(&SessionEvent::Message(UserMessage::EmptyPasswordError)));
}

#[tokio::test]
async fn successful_sign_in_navigates_to_settings() {
    let backend = InMemoryIdentityBackend::new();
    backend.add_account("u1", "alice@example.com", "pw");
    let mut controller = controller(&backend);
    let mut events = controller.subscribe_events();

    controller.on_email_change("alice@example.com");
    controller.on_password_change("pw");
    let outcome = controller.on_sign_in_click().await;

    assert_eq!(outcome, SessionOutcome::Ok);
    assert!(controller.session_state().is_authenticated());
    let events = drain(&mut events);
    assert!(navigated_to_settings(&events));
    assert!(events.contains(&SessionEvent::Outcome {
        action: "submit_login".to_string(),
        outcome: SessionOutcome::Ok,
    }));
}

#[tokio::test]
async fn rejected_credentials_surface_backend_error() {
    let backend = InMemoryIdentityBackend::new();
    backend.add_account("u1", "alice@example.com", "pw");
    let mut controller = controller(&backend);
    let mut events = controller.subscribe_events();

    controller.on_email_change("alice@example.com");
    controller.on_password_change("nope");
    let outcome = controller.on_sign_in_click().await;

    assert!(matches!(
        outcome,
        SessionOutcome::BackendError {
            kind: BackendErrorKind::InvalidCredential,
            ..
        }
    ));
    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::Message(UserMessage::SignInFailed)));
    assert!(!navigated_to_settings(&events));
}

#[tokio::test]
async fn social_sign_in_shares_the_password_result_mapping() {
    let backend = InMemoryIdentityBackend::new();
    backend.register_external_token(ProviderKind::Google, "g-token", "g@example.com");
    let controller = controller(&backend);
    let mut events = controller.subscribe_events();

    let outcome = controller
        .on_social_sign_in(ProviderKind::Google, "forged")
        .await;
    assert!(matches!(
        outcome,
        SessionOutcome::BackendError {
            kind: BackendErrorKind::InvalidCredential,
            ..
        }
    ));
    assert!(drain(&mut events).contains(&SessionEvent::Message(UserMessage::SignInFailed)));

    let outcome = controller
        .on_social_sign_in(ProviderKind::Google, "g-token")
        .await;
    assert_eq!(outcome, SessionOutcome::Ok);
    assert!(navigated_to_settings(&drain(&mut events)));
    assert_eq!(controller.session_state().identity().map(|i| i.sign_in_method_label()), Some("Google"));
}

#[tokio::test]
async fn forgot_password_validates_then_sends() {
    let backend = InMemoryIdentityBackend::new();
    backend.add_account("u1", "alice@example.com", "pw");
    let mut controller = controller(&backend);
    let mut events = controller.subscribe_events();

    controller.on_email_change("alice");
    assert_eq!(
        controller.on_forgot_password_click().await,
        SessionOutcome::ValidationError(ValidationError::InvalidEmail)
    );
    assert_eq!(backend.call_count(BackendOp::SendPasswordReset), 0);

    controller.on_email_change("alice@example.com");
    assert_eq!(controller.on_forgot_password_click().await, SessionOutcome::Ok);
    assert_eq!(backend.outbox().len(), 1);
    assert!(drain(&mut events).contains(&SessionEvent::Message(UserMessage::RecoveryEmailSent)));
}

#[tokio::test]
async fn deleting_an_anonymous_session_is_a_policy_error() {
    let backend = InMemoryIdentityBackend::new();
    let controller = controller(&backend);
    controller.machine().ensure_identity().await.expect("anonymous");

    let outcome = controller.on_delete_account_click().await;

    assert_eq!(
        outcome,
        SessionOutcome::PolicyError(PolicyError::CannotDeleteAnonymous)
    );
    assert_eq!(backend.call_count(BackendOp::DeleteCurrentAccount), 0);
}

#[tokio::test]
async fn delete_then_sign_out_keeps_an_anonymous_identity() {
    let backend = InMemoryIdentityBackend::new();
    backend.add_account("xyz", "xyz@example.com", "pw");
    backend.sign_in_as("xyz");
    let mut controller = controller(&backend);
    let mut events = controller.subscribe_events();

    assert_eq!(controller.handle(SessionIntent::DeleteAccount).await, SessionOutcome::Ok);
    assert!(drain(&mut events).contains(&SessionEvent::Message(UserMessage::AccountDeleted)));
    assert!(controller.session_state().is_anonymous());

    assert_eq!(controller.handle(SessionIntent::SignOut).await, SessionOutcome::Ok);
    assert!(controller.session_state().is_anonymous());
}

#[tokio::test]
async fn link_account_upgrades_in_place() {
    let backend = InMemoryIdentityBackend::new();
    backend.push_anonymous_id("abc123");
    let mut controller = controller(&backend);
    controller.machine().ensure_identity().await.expect("anonymous");

    controller.on_email_change("me@example.com");
    controller.on_password_change("pw");
    let outcome = controller.handle(SessionIntent::LinkAccount).await;

    assert_eq!(outcome, SessionOutcome::Ok);
    let state = controller.session_state();
    assert!(state.is_authenticated());
    assert_eq!(state.identity().map(|i| i.id.as_str()), Some("abc123"));
}

#[tokio::test]
async fn profile_editing_saves_only_changed_names() {
    let backend = InMemoryIdentityBackend::new();
    backend.add_account("xyz", "xyz@example.com", "pw");
    backend.sign_in_as("xyz");
    let mut controller = controller(&backend);

    controller.start_editing_profile();
    assert!(controller.profile().editing);
    assert_eq!(controller.profile().draft_name, "");
    assert!(!controller.profile().can_save());

    assert_eq!(controller.on_save_profile_click().await, SessionOutcome::Ok);
    assert_eq!(backend.call_count(BackendOp::UpdateProfile), 0);

    controller.on_display_name_change("Xavier");
    assert!(controller.profile().can_save());
    assert_eq!(controller.handle(SessionIntent::SaveProfile).await, SessionOutcome::Ok);

    assert_eq!(controller.profile(), &ProfileEditor::default());
    let identity = controller.machine().current_identity().expect("identity");
    assert_eq!(identity.display_name.as_deref(), Some("Xavier"));

    controller.start_editing_profile();
    assert_eq!(controller.profile().draft_name, "Xavier");
}

#[tokio::test]
async fn screen_guards_route_to_login() {
    let backend = InMemoryIdentityBackend::new();
    backend.add_account("u1", "alice@example.com", "pw");
    let mut controller = controller(&backend);
    let mut events = controller.subscribe_events();

    assert!(!controller.open_profile());
    assert!(drain(&mut events).contains(&SessionEvent::Navigate {
        open: Route::Login,
        pop_up: Route::Profile,
    }));

    controller.machine().ensure_identity().await.expect("anonymous");
    assert!(controller.open_profile());
    assert!(!controller.open_protected_zone());
    assert!(drain(&mut events).contains(&SessionEvent::Navigate {
        open: Route::Login,
        pop_up: Route::Protected,
    }));

    controller.on_email_change("alice@example.com");
    controller.on_password_change("pw");
    controller.on_sign_in_click().await;
    assert!(controller.open_protected_zone());
}

#[tokio::test]
async fn state_forwarding_stops_with_its_task() {
    let backend = InMemoryIdentityBackend::new();
    let controller = controller(&backend);
    let mut events = controller.subscribe_events();

    let forwarder = controller.forward_state_changes();
    assert_eq!(backend.listener_count(), 1);
    assert_eq!(
        events.recv().await.expect("initial state"),
        SessionEvent::StateChanged(SessionState::Unauthenticated)
    );

    controller.on_sign_out_click().await;
    let anonymous = loop {
        match events.recv().await.expect("event") {
            SessionEvent::StateChanged(state) => break state,
            _ => continue,
        }
    };
    assert!(anonymous.is_anonymous());

    forwarder.abort();
    assert!(forwarder.await.is_err());
    assert_eq!(backend.listener_count(), 0);
}

#[tokio::test]
async fn failed_link_reports_a_link_message() {
    let backend = InMemoryIdentityBackend::new();
    backend.add_account("owner", "taken@example.com", "pw");
    let mut controller = controller(&backend);
    controller.machine().ensure_identity().await.expect("anonymous");
    let mut events = controller.subscribe_events();

    controller.on_email_change("taken@example.com");
    controller.on_password_change("pw");
    let outcome = controller.on_link_account_click().await;

    assert!(matches!(
        outcome,
        SessionOutcome::BackendError {
            kind: BackendErrorKind::CredentialAlreadyInUse,
            ..
        }
    ));
    let events = drain(&mut events);
    assert!(events.contains(&SessionEvent::Message(UserMessage::LinkFailed)));
    assert!(!events.contains(&SessionEvent::Message(UserMessage::SignInFailed)));
    assert!(controller.session_state().is_anonymous());
}
