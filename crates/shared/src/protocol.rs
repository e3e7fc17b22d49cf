use serde::{Deserialize, Serialize};

use crate::{
    domain::{ProviderKind, SessionState},
    error::{BackendErrorKind, IdentityError, PolicyError, ValidationError},
};

/// Screens the presentation layer knows how to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Login,
    Settings,
    Profile,
    Protected,
}

/// User-initiated actions issued by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionIntent {
    SubmitLogin,
    ForgotPassword,
    DeleteAccount,
    SignOut,
    SocialSignIn {
        provider: ProviderKind,
        token: String,
    },
    LinkAccount,
    UnlinkProvider {
        provider: ProviderKind,
    },
    SaveProfile,
}

impl SessionIntent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionIntent::SubmitLogin => "submit_login",
            SessionIntent::ForgotPassword => "forgot_password",
            SessionIntent::DeleteAccount => "delete_account",
            SessionIntent::SignOut => "sign_out",
            SessionIntent::SocialSignIn { .. } => "social_sign_in",
            SessionIntent::LinkAccount => "link_account",
            SessionIntent::UnlinkProvider { .. } => "unlink_provider",
            SessionIntent::SaveProfile => "save_profile",
        }
    }
}

/// Uniform result of every controller action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionOutcome {
    Ok,
    ValidationError(ValidationError),
    BackendError {
        kind: BackendErrorKind,
        message: String,
    },
    PolicyError(PolicyError),
}

impl SessionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SessionOutcome::Ok)
    }
}

impl From<IdentityError> for SessionOutcome {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::Validation(kind) => SessionOutcome::ValidationError(kind),
            IdentityError::Backend(err) => SessionOutcome::BackendError {
                kind: err.kind,
                message: err.message,
            },
            IdentityError::Policy(kind) => SessionOutcome::PolicyError(kind),
        }
    }
}

impl<T> From<Result<T, IdentityError>> for SessionOutcome {
    fn from(value: Result<T, IdentityError>) -> Self {
        match value {
            Ok(_) => SessionOutcome::Ok,
            Err(err) => err.into(),
        }
    }
}

/// Short user-visible notices, one per localized string on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserMessage {
    EmailError,
    EmptyPasswordError,
    EmptyDisplayNameError,
    RecoveryEmailSent,
    SignInFailed,
    AccountDeleted,
    ProfileSaved,
    LinkFailed,
}

impl UserMessage {
    pub fn text(self) -> &'static str {
        match self {
            UserMessage::EmailError => "Please insert a valid email.",
            UserMessage::EmptyPasswordError => "Password cannot be empty.",
            UserMessage::EmptyDisplayNameError => "Name cannot be empty.",
            UserMessage::RecoveryEmailSent => "Check your inbox for the recovery email.",
            UserMessage::SignInFailed => "Sign in failed.",
            UserMessage::AccountDeleted => "Your account was deleted.",
            UserMessage::ProfileSaved => "Profile updated.",
            UserMessage::LinkFailed => "Could not link this account.",
        }
    }

    pub fn for_validation(kind: ValidationError) -> Self {
        match kind {
            ValidationError::InvalidEmail => UserMessage::EmailError,
            ValidationError::EmptyPassword => UserMessage::EmptyPasswordError,
            ValidationError::EmptyDisplayName => UserMessage::EmptyDisplayNameError,
        }
    }
}

/// Signals broadcast from the session controller to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    Outcome {
        action: String,
        outcome: SessionOutcome,
    },
    Navigate {
        open: Route,
        pop_up: Route,
    },
    Message(UserMessage),
    StateChanged(SessionState),
}
