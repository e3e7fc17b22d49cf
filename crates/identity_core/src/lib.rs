//! Account identity lifecycle on top of an external identity provider.
//!
//! [`IdentityStateMachine`] owns the transitions between no identity,
//! anonymous and authenticated sessions. [`SessionController`] sits between
//! it and a presentation layer.

pub mod backend;
pub mod config;
mod controller;
pub mod memory;
mod state_machine;
mod subscription;

pub use backend::{
    IdentityBackend, IdentityListener, ListenerHandle, MissingIdentityBackend, SocialSignInClient,
};
pub use config::{load_settings, Settings, UnlinkPolicy};
pub use controller::{LoginForm, ProfileEditor, SessionController};
pub use state_machine::IdentityStateMachine;
pub use subscription::IdentitySubscription;
