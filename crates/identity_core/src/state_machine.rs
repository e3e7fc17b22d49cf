use std::{future::Future, sync::Arc};

use futures::stream::BoxStream;
use shared::{
    domain::{Credential, Identity, ProviderKind, SessionState},
    error::{BackendError, BackendErrorKind, IdentityError, PolicyError, ValidationError},
    validation,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    backend::{IdentityBackend, SocialSignInClient},
    config::{Settings, UnlinkPolicy},
    subscription::{IdentityCell, IdentitySubscription},
};

/// Keeps backend notifications away from observers until dropped.
///
/// Dropping publishes whatever identity the backend settled on, including when
/// the owning future is cancelled partway through a transition.
struct DeferredNotifications<'a> {
    cell: &'a IdentityCell,
    backend: &'a dyn IdentityBackend,
}

impl<'a> DeferredNotifications<'a> {
    fn new(cell: &'a IdentityCell, backend: &'a dyn IdentityBackend) -> Self {
        cell.suspend();
        Self { cell, backend }
    }
}

impl Drop for DeferredNotifications<'_> {
    fn drop(&mut self) {
        self.cell.publish(self.backend.current_identity());
        self.cell.resume();
    }
}

fn validate_credential(credential: &Credential) -> Result<(), ValidationError> {
    match credential {
        Credential::EmailPassword { email, password } => {
            validation::validate_credentials(email, password)
        }
        Credential::External { .. } => Ok(()),
    }
}

/// Owns the identity lifecycle on top of an [`IdentityBackend`].
///
/// Operations are serialized: while one is outstanding every other operation
/// is rejected with [`PolicyError::OperationInProgress`]. `delete_account` and
/// `sign_out` always finish by provisioning a fresh anonymous identity, and
/// observers never see the signed-out state in between.
pub struct IdentityStateMachine {
    backend: Arc<dyn IdentityBackend>,
    social_clients: Vec<Arc<dyn SocialSignInClient>>,
    settings: Settings,
    cell: Arc<IdentityCell>,
    op_lock: Mutex<()>,
}

impl IdentityStateMachine {
    pub fn new(backend: Arc<dyn IdentityBackend>, settings: Settings) -> Self {
        let cell = IdentityCell::new(backend.current_identity());
        Self {
            backend,
            social_clients: Vec::new(),
            settings,
            cell,
            op_lock: Mutex::new(()),
        }
    }

    pub fn with_social_client(mut self, client: Arc<dyn SocialSignInClient>) -> Self {
        self.social_clients.push(client);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn current_identity(&self) -> Option<Identity> {
        if self.cell.is_suspended() {
            return self.cell.current();
        }
        self.settle()
    }

    pub fn session_state(&self) -> SessionState {
        SessionState::from(self.current_identity())
    }

    pub fn is_busy(&self) -> bool {
        self.op_lock.try_lock().is_err()
    }

    pub fn observe_identity(&self) -> IdentitySubscription {
        if !self.cell.is_suspended() {
            self.settle();
        }
        IdentitySubscription::register(Arc::clone(&self.backend), Arc::clone(&self.cell))
    }

    pub fn observe_session(&self) -> BoxStream<'static, SessionState> {
        self.observe_identity().session_states()
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        validation::validate_credentials(email, password)?;
        let _guard = self.begin("authenticate")?;

        let result = self
            .call(
                "sign_in_with_password",
                self.backend.sign_in_with_password(email.trim(), password),
            )
            .await;
        self.complete("authenticate", result)
    }

    pub async fn authenticate_with_credential(
        &self,
        credential: &Credential,
    ) -> Result<Identity, IdentityError> {
        validate_credential(credential)?;
        let _guard = self.begin("authenticate_with_credential")?;

        let result = self
            .call(
                "sign_in_with_credential",
                self.backend.sign_in_with_credential(credential),
            )
            .await;
        self.complete("authenticate_with_credential", result)
    }

    pub async fn send_recovery_email(&self, email: &str) -> Result<(), IdentityError> {
        validation::validate_email(email)?;
        let _guard = self.begin("send_recovery_email")?;

        let result = self
            .call(
                "send_password_reset",
                self.backend.send_password_reset(email.trim()),
            )
            .await;
        self.complete("send_recovery_email", result)
    }

    /// Fails with `AlreadyAnonymous` rather than creating a second anonymous account.
    pub async fn provision_anonymous(&self) -> Result<Identity, IdentityError> {
        let _guard = self.begin("provision_anonymous")?;

        match self.backend.current_identity() {
            Some(identity) if identity.is_anonymous => {
                debug!(identity_id = %identity.id, "anonymous identity already present");
                Err(PolicyError::AlreadyAnonymous.into())
            }
            Some(identity) => {
                debug!(identity_id = %identity.id, "permanent identity already signed in");
                Err(PolicyError::AlreadySignedIn.into())
            }
            None => {
                let result = self
                    .call("sign_in_anonymously", self.backend.sign_in_anonymously())
                    .await;
                self.complete("provision_anonymous", result)
            }
        }
    }

    /// Returns the current identity, provisioning an anonymous one if there is none.
    pub async fn ensure_identity(&self) -> Result<Identity, IdentityError> {
        let _guard = self.begin("ensure_identity")?;

        if let Some(identity) = self.backend.current_identity() {
            self.cell.publish(Some(identity.clone()));
            return Ok(identity);
        }
        let result = self
            .call("sign_in_anonymously", self.backend.sign_in_anonymously())
            .await;
        self.complete("ensure_identity", result)
    }

    /// Upgrades the anonymous identity in place; the id never changes.
    pub async fn link_with_credential(
        &self,
        credential: &Credential,
    ) -> Result<Identity, IdentityError> {
        validate_credential(credential)?;
        let _guard = self.begin("link_with_credential")?;

        let anonymous = match self.backend.current_identity() {
            Some(identity) if identity.is_anonymous => identity,
            _ => {
                debug!("link refused: current identity is not anonymous");
                return Err(PolicyError::NotAnonymous.into());
            }
        };

        let result = self
            .call("link_credential", self.backend.link_credential(credential))
            .await
            .and_then(|linked| {
                if linked.id == anonymous.id {
                    Ok(linked)
                } else {
                    Err(BackendError::new(
                        BackendErrorKind::Unexpected,
                        format!(
                            "backend replaced identity {} with {} while linking",
                            anonymous.id, linked.id
                        ),
                    ))
                }
            });
        self.complete("link_with_credential", result)
    }

    pub async fn unlink_external_provider(
        &self,
        provider: ProviderKind,
    ) -> Result<Identity, IdentityError> {
        let _guard = self.begin("unlink_external_provider")?;

        if self.backend.current_identity().is_none() {
            return Err(PolicyError::NoIdentity.into());
        }
        let result = self
            .call("unlink_provider", self.backend.unlink_provider(provider))
            .await;
        self.complete("unlink_external_provider", result)
    }

    pub async fn update_display_name(&self, display_name: &str) -> Result<(), IdentityError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ValidationError::EmptyDisplayName.into());
        }
        let _guard = self.begin("update_display_name")?;

        if self.backend.current_identity().is_none() {
            return Err(PolicyError::NoIdentity.into());
        }
        let result = self
            .call("update_profile", self.backend.update_profile(display_name))
            .await;
        self.complete("update_display_name", result)
    }

    /// Deletes the permanent account and returns the anonymous identity that replaces it.
    pub async fn delete_account(&self) -> Result<Identity, IdentityError> {
        let _guard = self.begin("delete_account")?;

        let identity = match self.backend.current_identity() {
            Some(identity) if identity.is_permanent() => identity,
            _ => {
                debug!("delete refused: no permanent identity");
                return Err(PolicyError::CannotDeleteAnonymous.into());
            }
        };

        let deferred = DeferredNotifications::new(&self.cell, &*self.backend);
        let result = self.delete_and_reprovision(&identity).await;
        drop(deferred);

        self.complete("delete_account", result)
    }

    /// Always ends with a fresh anonymous identity when the backend is reachable.
    pub async fn sign_out(&self) -> Result<Identity, IdentityError> {
        let _guard = self.begin("sign_out")?;

        let deferred = DeferredNotifications::new(&self.cell, &*self.backend);
        let result = self.sign_out_and_reprovision().await;
        drop(deferred);

        self.complete("sign_out", result)
    }

    async fn delete_and_reprovision(&self, identity: &Identity) -> Result<Identity, BackendError> {
        self.release_social_sessions(identity, self.settings.unlink_policy)
            .await?;

        self.call(
            "delete_current_account",
            self.backend.delete_current_account(),
        )
        .await?;
        info!(identity_id = %identity.id, "account deleted");

        self.call("sign_out", self.backend.sign_out()).await?;
        self.call("sign_in_anonymously", self.backend.sign_in_anonymously())
            .await
    }

    async fn sign_out_and_reprovision(&self) -> Result<Identity, BackendError> {
        match self.backend.current_identity() {
            Some(identity) if identity.is_anonymous => {
                if let Err(err) = self
                    .call(
                        "delete_current_account",
                        self.backend.delete_current_account(),
                    )
                    .await
                {
                    warn!(identity_id = %identity.id, %err, "failed to discard anonymous account");
                }
            }
            Some(identity) => {
                self.release_social_sessions(&identity, UnlinkPolicy::BestEffort)
                    .await?;
                debug!(identity_id = %identity.id, "keeping permanent account on sign-out");
            }
            None => debug!("sign-out without identity; provisioning"),
        }

        self.call("sign_out", self.backend.sign_out()).await?;
        self.call("sign_in_anonymously", self.backend.sign_in_anonymously())
            .await
    }

    async fn release_social_sessions(
        &self,
        identity: &Identity,
        policy: UnlinkPolicy,
    ) -> Result<(), BackendError> {
        for client in &self.social_clients {
            let provider = client.provider();
            if !identity.has_provider(provider) {
                continue;
            }

            match self.call("social_sign_out", client.sign_out()).await {
                Ok(()) => debug!(provider = provider.provider_id(), "social session released"),
                Err(err) if policy == UnlinkPolicy::Strict => {
                    warn!(provider = provider.provider_id(), %err, "social sign-out failed; aborting");
                    return Err(err);
                }
                Err(err) => {
                    warn!(provider = provider.provider_id(), %err, "social sign-out failed; continuing");
                }
            }
        }
        Ok(())
    }

    fn begin(&self, op: &'static str) -> Result<MutexGuard<'_, ()>, IdentityError> {
        self.op_lock.try_lock().map_err(|_| {
            debug!(op, "rejected while another identity operation is running");
            IdentityError::from(PolicyError::OperationInProgress)
        })
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let timeout = self.settings.operation_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::network(format!(
                "{op} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Publishes the backend's current identity to observers.
    fn settle(&self) -> Option<Identity> {
        let identity = self.backend.current_identity();
        self.cell.publish(identity.clone());
        identity
    }

    fn complete<T>(
        &self,
        op: &'static str,
        result: Result<T, BackendError>,
    ) -> Result<T, IdentityError> {
        let settled = self.settle();
        match result {
            Ok(value) => {
                info!(
                    op,
                    identity_id = settled.as_ref().map(|i| i.id.as_str()).unwrap_or("-"),
                    "identity operation completed"
                );
                Ok(value)
            }
            Err(err) => {
                warn!(op, kind = ?err.kind, message = %err.message, "identity operation failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/state_machine_tests.rs"]
mod tests;
