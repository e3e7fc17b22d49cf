use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local input problems. Resolved before any backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    #[error("email address is not valid")]
    InvalidEmail,
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("display name must not be empty")]
    EmptyDisplayName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    InvalidCredential,
    UnknownAccount,
    CredentialAlreadyInUse,
    RequiresRecentLogin,
    NetworkError,
    NoSuchLink,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NetworkError, message)
    }
}

/// Requests that are illegal in the current identity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum PolicyError {
    #[error("anonymous or absent identities cannot be deleted")]
    CannotDeleteAnonymous,
    #[error("another identity operation is still in progress")]
    OperationInProgress,
    #[error("an anonymous identity already exists")]
    AlreadyAnonymous,
    #[error("a permanent identity is already signed in")]
    AlreadySignedIn,
    #[error("only anonymous identities can be linked")]
    NotAnonymous,
    #[error("no identity is signed in")]
    NoIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("backend request failed: {0}")]
    Backend(#[from] BackendError),
    #[error("operation refused: {0}")]
    Policy(#[from] PolicyError),
}

impl IdentityError {
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            IdentityError::Backend(err) => Some(err.kind),
            _ => None,
        }
    }

    /// Expected user-facing outcomes that are not worth a warning in logs.
    pub fn is_expected(&self) -> bool {
        !matches!(self, IdentityError::Backend(_))
    }
}
