use std::sync::Arc;

use futures::StreamExt;
use shared::{
    domain::{Credential, ProviderKind, SessionState},
    error::{IdentityError, ValidationError},
    protocol::{Route, SessionEvent, SessionIntent, SessionOutcome, UserMessage},
    validation,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::state_machine::IdentityStateMachine;

/// Text typed into the login form. Independent of the identity itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// Edit mode of the profile screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileEditor {
    pub editing: bool,
    pub draft_name: String,
    pub dirty: bool,
}

impl ProfileEditor {
    pub fn can_save(&self) -> bool {
        self.editing && self.dirty
    }
}

/// Turns user intents into state machine calls and reports the results.
pub struct SessionController {
    machine: Arc<IdentityStateMachine>,
    form: LoginForm,
    profile: ProfileEditor,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(machine: Arc<IdentityStateMachine>) -> Self {
        let (events, _) = broadcast::channel(machine.settings().event_buffer);
        Self {
            machine,
            form: LoginForm::default(),
            profile: ProfileEditor::default(),
            events,
        }
    }

    pub fn machine(&self) -> &Arc<IdentityStateMachine> {
        &self.machine
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.machine.session_state()
    }

    pub fn form(&self) -> &LoginForm {
        &self.form
    }

    pub fn profile(&self) -> &ProfileEditor {
        &self.profile
    }

    pub fn on_email_change(&mut self, email: impl Into<String>) {
        self.form.email = email.into();
    }

    pub fn on_password_change(&mut self, password: impl Into<String>) {
        self.form.password = password.into();
    }

    /// Re-broadcasts every identity change as `SessionEvent::StateChanged`.
    ///
    /// Aborting the returned task drops the subscription and its backend listener.
    pub fn forward_state_changes(&self) -> JoinHandle<()> {
        let mut states = self.machine.observe_identity().session_states();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(state) = states.next().await {
                let _ = events.send(SessionEvent::StateChanged(state));
            }
        })
    }

    pub async fn on_sign_in_click(&self) -> SessionOutcome {
        const ACTION: &str = "submit_login";
        if let Err(kind) = validation::validate_credentials(&self.form.email, &self.form.password)
        {
            return self.reject(ACTION, kind);
        }

        let result = self
            .machine
            .authenticate(&self.form.email, &self.form.password)
            .await;
        self.report_sign_in(ACTION, result, UserMessage::SignInFailed)
    }

    /// Exchanges a social provider token; results are reported like password sign-in.
    pub async fn on_social_sign_in(&self, provider: ProviderKind, token: &str) -> SessionOutcome {
        let credential = Credential::external(provider, token);
        let result = self.machine.authenticate_with_credential(&credential).await;
        self.report_sign_in("social_sign_in", result, UserMessage::SignInFailed)
    }

    /// Upgrades the anonymous identity with the email and password in the form.
    pub async fn on_link_account_click(&self) -> SessionOutcome {
        const ACTION: &str = "link_account";
        if let Err(kind) = validation::validate_credentials(&self.form.email, &self.form.password)
        {
            return self.reject(ACTION, kind);
        }

        let credential = Credential::email_password(self.form.email.trim(), self.form.password.as_str());
        let result = self.machine.link_with_credential(&credential).await;
        self.report_sign_in(ACTION, result, UserMessage::LinkFailed)
    }

    pub async fn on_forgot_password_click(&self) -> SessionOutcome {
        const ACTION: &str = "forgot_password";
        if let Err(kind) = validation::validate_email(&self.form.email) {
            return self.reject(ACTION, kind);
        }

        let result = self.machine.send_recovery_email(&self.form.email).await;
        if result.is_ok() {
            self.emit(SessionEvent::Message(UserMessage::RecoveryEmailSent));
        }
        self.finish(ACTION, result)
    }

    pub async fn on_delete_account_click(&self) -> SessionOutcome {
        let result = self.machine.delete_account().await;
        if result.is_ok() {
            self.emit(SessionEvent::Message(UserMessage::AccountDeleted));
        }
        self.finish("delete_account", result)
    }

    pub async fn on_sign_out_click(&self) -> SessionOutcome {
        let result = self.machine.sign_out().await;
        self.finish("sign_out", result)
    }

    pub async fn on_unlink_provider_click(&self, provider: ProviderKind) -> SessionOutcome {
        let result = self.machine.unlink_external_provider(provider).await;
        self.finish("unlink_provider", result)
    }

    pub fn start_editing_profile(&mut self) {
        let current_name = self
            .machine
            .current_identity()
            .and_then(|identity| identity.display_name)
            .unwrap_or_default();
        self.profile = ProfileEditor {
            editing: true,
            draft_name: current_name,
            dirty: false,
        };
    }

    pub fn on_display_name_change(&mut self, name: impl Into<String>) {
        self.profile.draft_name = name.into();
        self.profile.dirty = true;
    }

    pub fn cancel_editing_profile(&mut self) {
        self.profile = ProfileEditor::default();
    }

    pub async fn on_save_profile_click(&mut self) -> SessionOutcome {
        const ACTION: &str = "save_profile";
        if !self.profile.can_save() {
            debug!("profile save ignored: nothing changed");
            return self.finish(ACTION, Ok(()));
        }

        let result = self
            .machine
            .update_display_name(&self.profile.draft_name)
            .await;
        if result.is_ok() {
            self.profile = ProfileEditor::default();
            self.emit(SessionEvent::Message(UserMessage::ProfileSaved));
        } else if let Err(IdentityError::Validation(kind)) = &result {
            self.emit(SessionEvent::Message(UserMessage::for_validation(*kind)));
        }
        self.finish(ACTION, result)
    }

    /// Protected screens require a permanent identity; otherwise route to login.
    pub fn open_protected_zone(&self) -> bool {
        if self.machine.session_state().is_authenticated() {
            return true;
        }
        self.emit(SessionEvent::Navigate {
            open: Route::Login,
            pop_up: Route::Protected,
        });
        false
    }

    /// The profile screen needs some identity, anonymous or not.
    pub fn open_profile(&self) -> bool {
        if self.machine.current_identity().is_some() {
            return true;
        }
        self.emit(SessionEvent::Navigate {
            open: Route::Login,
            pop_up: Route::Profile,
        });
        false
    }

    pub async fn handle(&mut self, intent: SessionIntent) -> SessionOutcome {
        debug!(intent = intent.name(), "handling session intent");
        match intent {
            SessionIntent::SubmitLogin => self.on_sign_in_click().await,
            SessionIntent::ForgotPassword => self.on_forgot_password_click().await,
            SessionIntent::DeleteAccount => self.on_delete_account_click().await,
            SessionIntent::SignOut => self.on_sign_out_click().await,
            SessionIntent::SocialSignIn { provider, token } => {
                self.on_social_sign_in(provider, &token).await
            }
            SessionIntent::LinkAccount => self.on_link_account_click().await,
            SessionIntent::UnlinkProvider { provider } => {
                self.on_unlink_provider_click(provider).await
            }
            SessionIntent::SaveProfile => self.on_save_profile_click().await,
        }
    }

    fn report_sign_in<T>(
        &self,
        action: &str,
        result: Result<T, IdentityError>,
        failure: UserMessage,
    ) -> SessionOutcome {
        match &result {
            Ok(_) => self.emit(SessionEvent::Navigate {
                open: Route::Settings,
                pop_up: Route::Login,
            }),
            Err(IdentityError::Backend(_)) => self.emit(SessionEvent::Message(failure)),
            Err(_) => {}
        }
        self.finish(action, result)
    }

    fn reject(&self, action: &str, kind: ValidationError) -> SessionOutcome {
        self.emit(SessionEvent::Message(UserMessage::for_validation(kind)));
        self.finish(action, Err::<(), _>(kind.into()))
    }

    fn finish<T>(&self, action: &str, result: Result<T, IdentityError>) -> SessionOutcome {
        match &result {
            Ok(_) => info!(action, "session action succeeded"),
            Err(err) if err.is_expected() => debug!(action, %err, "session action refused"),
            Err(err) => warn!(action, %err, "session action failed"),
        }

        let outcome = SessionOutcome::from(result);
        self.emit(SessionEvent::Outcome {
            action: action.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
