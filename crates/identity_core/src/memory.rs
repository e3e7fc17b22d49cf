//! In-process identity backend and social client.
//!
//! Behaves like a hosted identity provider closely enough to drive the state
//! machine end to end: anonymous accounts, in-place linking, external id
//! tokens, listener notifications. Tests use the call counters, one-shot
//! failure injection and artificial delays.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{Credential, Identity, IdentityId, ProviderKind},
    error::{BackendError, BackendErrorKind},
};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{IdentityBackend, IdentityListener, ListenerHandle, SocialSignInClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    SignInWithPassword,
    SignInWithCredential,
    SignInAnonymously,
    LinkCredential,
    UnlinkProvider,
    SendPasswordReset,
    DeleteCurrentAccount,
    SignOut,
    UpdateProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryEmail {
    pub email: String,
    pub sent_at: DateTime<Utc>,
}

struct Account {
    identity: Identity,
    password: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<IdentityId, Account>,
    external_tokens: HashMap<String, (ProviderKind, String)>,
    current: Option<IdentityId>,
    listeners: HashMap<u64, IdentityListener>,
    next_listener: u64,
    anonymous_ids: VecDeque<String>,
    calls: HashMap<BackendOp, usize>,
    failures: HashMap<BackendOp, BackendError>,
    delays: HashMap<BackendOp, Duration>,
    outbox: Vec<RecoveryEmail>,
}

impl MemoryState {
    fn current_identity(&self) -> Option<Identity> {
        let id = self.current.as_ref()?;
        self.accounts.get(id).map(|account| account.identity.clone())
    }

    fn current_account_mut(&mut self) -> Result<&mut Account, BackendError> {
        let id = self
            .current
            .clone()
            .ok_or_else(|| BackendError::new(BackendErrorKind::Unexpected, "no signed-in user"))?;
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| BackendError::new(BackendErrorKind::Unexpected, "signed-in user vanished"))
    }

    fn find_by_email(&self, email: &str) -> Option<&Account> {
        self.accounts.values().find(|account| {
            !account.identity.is_anonymous
                && account
                    .identity
                    .email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
        })
    }

    fn resolve_token(&self, provider: ProviderKind, token: &str) -> Result<String, BackendError> {
        match self.external_tokens.get(token) {
            Some((known_provider, email)) if *known_provider == provider => Ok(email.clone()),
            _ => Err(BackendError::new(
                BackendErrorKind::InvalidCredential,
                format!("{} id token was rejected", provider.provider_id()),
            )),
        }
    }

    fn sign_in_with_password(&mut self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let account = self
            .find_by_email(email)
            .filter(|account| account.password.as_deref() == Some(password))
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorKind::InvalidCredential,
                    "the email or password is incorrect",
                )
            })?;
        let identity = account.identity.clone();
        self.current = Some(identity.id.clone());
        Ok(identity)
    }

    fn sign_in_with_external(&mut self, provider: ProviderKind, token: &str) -> Result<Identity, BackendError> {
        let email = self.resolve_token(provider, token)?;
        let existing = self.find_by_email(&email).map(|a| a.identity.id.clone());

        let id = match existing {
            Some(id) => id,
            None => {
                let identity = Identity {
                    id: IdentityId(Uuid::new_v4().simple().to_string()),
                    is_anonymous: false,
                    email: Some(email),
                    display_name: None,
                    providers: Vec::new(),
                    created_at: Utc::now(),
                };
                let id = identity.id.clone();
                self.accounts.insert(
                    id.clone(),
                    Account {
                        identity,
                        password: None,
                    },
                );
                id
            }
        };

        let account = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| BackendError::new(BackendErrorKind::Unexpected, "account vanished"))?;
        if !account.identity.has_provider(provider) {
            account.identity.providers.push(provider);
        }
        let identity = account.identity.clone();
        self.current = Some(id);
        Ok(identity)
    }

    fn link(&mut self, credential: &Credential) -> Result<Identity, BackendError> {
        let provider = credential.provider();
        let (email, password) = match credential {
            Credential::EmailPassword { email, password } => {
                (email.trim().to_string(), Some(password.as_str().to_string()))
            }
            Credential::External { provider, id_token } => {
                (self.resolve_token(*provider, id_token)?, None)
            }
        };

        let current_id = self.current.clone();
        if let Some(owner) = self.find_by_email(&email) {
            if Some(&owner.identity.id) != current_id.as_ref() {
                return Err(BackendError::new(
                    BackendErrorKind::CredentialAlreadyInUse,
                    format!("{email} already belongs to another account"),
                ));
            }
        }

        let account = self.current_account_mut()?;
        if account.identity.has_provider(provider) {
            return Err(BackendError::new(
                BackendErrorKind::CredentialAlreadyInUse,
                format!("{} is already linked", provider.provider_id()),
            ));
        }
        account.identity.is_anonymous = false;
        account.identity.providers.push(provider);
        if account.identity.email.is_none() {
            account.identity.email = Some(email);
        }
        if password.is_some() {
            account.password = password;
        }
        Ok(account.identity.clone())
    }
}

pub struct InMemoryIdentityBackend {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryIdentityBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl InMemoryIdentityBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a permanent email/password account without signing it in.
    pub fn add_account(&self, id: &str, email: &str, password: &str) -> Identity {
        let identity = Identity {
            id: IdentityId::from(id),
            is_anonymous: false,
            email: Some(email.to_string()),
            display_name: None,
            providers: vec![ProviderKind::Password],
            created_at: Utc::now(),
        };
        self.state().accounts.insert(
            identity.id.clone(),
            Account {
                identity: identity.clone(),
                password: Some(password.to_string()),
            },
        );
        identity
    }

    /// Makes `token` a valid id token for `provider` that resolves to `email`.
    pub fn register_external_token(&self, provider: ProviderKind, token: &str, email: &str) {
        self.state()
            .external_tokens
            .insert(token.to_string(), (provider, email.to_string()));
    }

    /// Signs an existing account in directly, bypassing call accounting.
    pub fn sign_in_as(&self, id: &str) -> Option<Identity> {
        let (listeners, identity) = {
            let mut state = self.state();
            let id = IdentityId::from(id);
            if !state.accounts.contains_key(&id) {
                return None;
            }
            state.current = Some(id);
            (
                state.listeners.values().cloned().collect::<Vec<_>>(),
                state.current_identity(),
            )
        };
        notify(&listeners, identity.clone());
        identity
    }

    pub fn push_anonymous_id(&self, id: &str) {
        self.state().anonymous_ids.push_back(id.to_string());
    }

    /// The next call of `op` fails with `err`.
    pub fn fail_next(&self, op: BackendOp, err: BackendError) {
        self.state().failures.insert(op, err);
    }

    pub fn set_delay(&self, op: BackendOp, delay: Duration) {
        self.state().delays.insert(op, delay);
    }

    pub fn call_count(&self, op: BackendOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    pub fn account_exists(&self, id: &str) -> bool {
        self.state().accounts.contains_key(&IdentityId::from(id))
    }

    pub fn outbox(&self) -> Vec<RecoveryEmail> {
        self.state().outbox.clone()
    }

    async fn run<T>(
        &self,
        op: BackendOp,
        f: impl FnOnce(&mut MemoryState) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let delay = {
            let mut state = self.state();
            *state.calls.entry(op).or_insert(0) += 1;
            state.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (result, changed) = {
            let mut state = self.state();
            if let Some(err) = state.failures.remove(&op) {
                debug!(?op, %err, "injected backend failure");
                return Err(err);
            }
            let before = state.current_identity();
            let result = f(&mut *state);
            let after = state.current_identity();
            let changed = (before != after)
                .then(|| (state.listeners.values().cloned().collect::<Vec<_>>(), after));
            (result, changed)
        };

        if let Some((listeners, identity)) = changed {
            notify(&listeners, identity);
        }
        result
    }
}

fn notify(listeners: &[IdentityListener], identity: Option<Identity>) {
    for listener in listeners {
        listener(identity.clone());
    }
}

#[async_trait]
impl IdentityBackend for InMemoryIdentityBackend {
    fn current_identity(&self) -> Option<Identity> {
        self.state().current_identity()
    }

    fn add_identity_listener(&self, listener: IdentityListener) -> ListenerHandle {
        let (handle, current) = {
            let mut state = self.state();
            state.next_listener += 1;
            let handle = state.next_listener;
            state.listeners.insert(handle, Arc::clone(&listener));
            (handle, state.current_identity())
        };
        // Hosted providers fire once on registration.
        listener(current);
        ListenerHandle(handle)
    }

    fn remove_identity_listener(&self, handle: ListenerHandle) {
        self.state().listeners.remove(&handle.0);
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, BackendError> {
        self.run(BackendOp::SignInWithPassword, |state| {
            state.sign_in_with_password(email, password)
        })
        .await
    }

    async fn sign_in_with_credential(
        &self,
        credential: &Credential,
    ) -> Result<Identity, BackendError> {
        self.run(BackendOp::SignInWithCredential, |state| match credential {
            Credential::EmailPassword { email, password } => {
                state.sign_in_with_password(email, password)
            }
            Credential::External { provider, id_token } => {
                state.sign_in_with_external(*provider, id_token)
            }
        })
        .await
    }

    async fn sign_in_anonymously(&self) -> Result<Identity, BackendError> {
        self.run(BackendOp::SignInAnonymously, |state| {
            let id = state
                .anonymous_ids
                .pop_front()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let identity = Identity {
                id: IdentityId(id),
                is_anonymous: true,
                email: None,
                display_name: None,
                providers: Vec::new(),
                created_at: Utc::now(),
            };
            state.accounts.insert(
                identity.id.clone(),
                Account {
                    identity: identity.clone(),
                    password: None,
                },
            );
            state.current = Some(identity.id.clone());
            Ok(identity)
        })
        .await
    }

    async fn link_credential(&self, credential: &Credential) -> Result<Identity, BackendError> {
        self.run(BackendOp::LinkCredential, |state| state.link(credential))
            .await
    }

    async fn unlink_provider(&self, provider: ProviderKind) -> Result<Identity, BackendError> {
        self.run(BackendOp::UnlinkProvider, |state| {
            let account = state.current_account_mut()?;
            let before = account.identity.providers.len();
            account.identity.providers.retain(|p| *p != provider);
            if account.identity.providers.len() == before {
                return Err(BackendError::new(
                    BackendErrorKind::NoSuchLink,
                    format!("{} is not linked", provider.provider_id()),
                ));
            }
            if provider == ProviderKind::Password {
                account.password = None;
            }
            Ok(account.identity.clone())
        })
        .await
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), BackendError> {
        self.run(BackendOp::SendPasswordReset, |state| {
            if state.find_by_email(email).is_none() {
                return Err(BackendError::new(
                    BackendErrorKind::UnknownAccount,
                    format!("no account for {email}"),
                ));
            }
            state.outbox.push(RecoveryEmail {
                email: email.to_string(),
                sent_at: Utc::now(),
            });
            Ok(())
        })
        .await
    }

    async fn delete_current_account(&self) -> Result<(), BackendError> {
        self.run(BackendOp::DeleteCurrentAccount, |state| {
            let id = state
                .current
                .take()
                .ok_or_else(|| BackendError::new(BackendErrorKind::Unexpected, "no signed-in user"))?;
            state.accounts.remove(&id);
            Ok(())
        })
        .await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.run(BackendOp::SignOut, |state| {
            state.current = None;
            Ok(())
        })
        .await
    }

    async fn update_profile(&self, display_name: &str) -> Result<(), BackendError> {
        self.run(BackendOp::UpdateProfile, |state| {
            state.current_account_mut()?.identity.display_name = Some(display_name.to_string());
            Ok(())
        })
        .await
    }
}

/// Social sign-in session that only counts sign-outs.
pub struct InMemorySocialClient {
    provider: ProviderKind,
    sign_outs: AtomicUsize,
    failure: Mutex<Option<BackendError>>,
}

impl InMemorySocialClient {
    pub fn new(provider: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            provider,
            sign_outs: AtomicUsize::new(0),
            failure: Mutex::new(None),
        })
    }

    pub fn fail_next_sign_out(&self, err: BackendError) {
        *self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(err);
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocialSignInClient for InMemorySocialClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
