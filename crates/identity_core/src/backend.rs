use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{Credential, Identity, ProviderKind},
    error::BackendError,
};

/// Callback fired by the backend whenever its current identity changes.
pub type IdentityListener = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// The external identity provider. Owns every piece of durable account state.
///
/// Listener registration is synchronous so that a subscription can unregister
/// itself from `Drop`.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
    fn add_identity_listener(&self, listener: IdentityListener) -> ListenerHandle;
    fn remove_identity_listener(&self, handle: ListenerHandle);

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, BackendError>;
    async fn sign_in_with_credential(&self, credential: &Credential)
        -> Result<Identity, BackendError>;
    async fn sign_in_anonymously(&self) -> Result<Identity, BackendError>;
    async fn link_credential(&self, credential: &Credential) -> Result<Identity, BackendError>;
    async fn unlink_provider(&self, provider: ProviderKind) -> Result<Identity, BackendError>;
    async fn send_password_reset(&self, email: &str) -> Result<(), BackendError>;
    async fn delete_current_account(&self) -> Result<(), BackendError>;
    async fn sign_out(&self) -> Result<(), BackendError>;
    async fn update_profile(&self, display_name: &str) -> Result<(), BackendError>;
}

/// Session held by a social sign-in SDK, separate from the identity backend.
#[async_trait]
pub trait SocialSignInClient: Send + Sync {
    fn provider(&self) -> ProviderKind;
    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Placeholder used until a real backend is wired in; every call fails.
pub struct MissingIdentityBackend;

fn unavailable(op: &str) -> BackendError {
    BackendError::network(format!("identity backend unavailable for {op}"))
}

#[async_trait]
impl IdentityBackend for MissingIdentityBackend {
    fn current_identity(&self) -> Option<Identity> {
        None
    }

    fn add_identity_listener(&self, _listener: IdentityListener) -> ListenerHandle {
        ListenerHandle(0)
    }

    fn remove_identity_listener(&self, _handle: ListenerHandle) {}

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Identity, BackendError> {
        Err(unavailable("sign_in_with_password"))
    }

    async fn sign_in_with_credential(
        &self,
        _credential: &Credential,
    ) -> Result<Identity, BackendError> {
        Err(unavailable("sign_in_with_credential"))
    }

    async fn sign_in_anonymously(&self) -> Result<Identity, BackendError> {
        Err(unavailable("sign_in_anonymously"))
    }

    async fn link_credential(&self, _credential: &Credential) -> Result<Identity, BackendError> {
        Err(unavailable("link_credential"))
    }

    async fn unlink_provider(&self, _provider: ProviderKind) -> Result<Identity, BackendError> {
        Err(unavailable("unlink_provider"))
    }

    async fn send_password_reset(&self, _email: &str) -> Result<(), BackendError> {
        Err(unavailable("send_password_reset"))
    }

    async fn delete_current_account(&self) -> Result<(), BackendError> {
        Err(unavailable("delete_current_account"))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        Err(unavailable("sign_out"))
    }

    async fn update_profile(&self, _display_name: &str) -> Result<(), BackendError> {
        Err(unavailable("update_profile"))
    }
}
