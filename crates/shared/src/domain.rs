use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

macro_rules! string_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id_newtype!(IdentityId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Password,
    Google,
}

impl ProviderKind {
    /// Provider id as reported by the identity backend.
    pub fn provider_id(self) -> &'static str {
        match self {
            ProviderKind::Password => "password",
            ProviderKind::Google => "google.com",
        }
    }

    pub fn from_provider_id(provider_id: &str) -> Option<Self> {
        match provider_id {
            "password" => Some(ProviderKind::Password),
            "google.com" => Some(ProviderKind::Google),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub is_anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub providers: Vec<ProviderKind>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_permanent(&self) -> bool {
        !self.is_anonymous
    }

    pub fn has_provider(&self, provider: ProviderKind) -> bool {
        self.providers.contains(&provider)
    }

    /// Label for the sign-in method shown on the profile screen.
    pub fn sign_in_method_label(&self) -> &'static str {
        if self.is_anonymous {
            "Anonymous"
        } else if self.has_provider(ProviderKind::Google) {
            "Google"
        } else {
            "Email"
        }
    }
}

/// Projection of the backend's current identity. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "identity", rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Anonymous(Identity),
    Authenticated(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Unauthenticated => None,
            SessionState::Anonymous(identity) | SessionState::Authenticated(identity) => {
                Some(identity)
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, SessionState::Anonymous(_))
    }
}

impl From<Option<Identity>> for SessionState {
    fn from(value: Option<Identity>) -> Self {
        match value {
            None => SessionState::Unauthenticated,
            Some(identity) if identity.is_anonymous => SessionState::Anonymous(identity),
            Some(identity) => SessionState::Authenticated(identity),
        }
    }
}

/// Sign-in material for a single auth operation. Secrets are wiped on drop.
#[derive(Clone)]
pub enum Credential {
    EmailPassword {
        email: String,
        password: Zeroizing<String>,
    },
    External {
        provider: ProviderKind,
        id_token: Zeroizing<String>,
    },
}

impl Credential {
    pub fn email_password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::EmailPassword {
            email: email.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn external(provider: ProviderKind, id_token: impl Into<String>) -> Self {
        Credential::External {
            provider,
            id_token: Zeroizing::new(id_token.into()),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            Credential::EmailPassword { .. } => ProviderKind::Password,
            Credential::External { provider, .. } => *provider,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::EmailPassword { email, .. } => f
                .debug_struct("EmailPassword")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Credential::External { provider, .. } => f
                .debug_struct("External")
                .field("provider", provider)
                .field("id_token", &"<redacted>")
                .finish(),
        }
    }
}
