//! Session Management Module
//!
//! Reconciles the identity provider's session with the cached profile. The
//! [`SessionMachine`] holds the state and decides; the [`AuthService`] feeds
//! it provider events and load results and publishes what changed.

pub mod machine;
pub mod service;
pub mod state;

pub use machine::{PendingEdit, SessionMachine};
pub use service::AuthService;
pub use state::*;
