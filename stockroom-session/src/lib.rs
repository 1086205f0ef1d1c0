//! Stockroom Session - Session and profile consistency layer
//!
//! This crate reconciles the identity provider's asynchronous session events
//! with the separately stored authorization profile. It includes:
//!
//! - A profile loader with bounded retries, timeouts and auto-provisioning
//! - A generation-tagged session state machine that discards stale results
//! - An authorization gate deriving role predicates and feature visibility
//! - In-memory collaborators for tests and local simulation
//!
//! ## Architecture
//!
//! - **Core** (stockroom-core): data model, collaborator traits, infrastructure
//! - **Session** (this crate): state ownership and reconciliation
//! - **Presentation** (stockroom-cli, UI): consumers of [`AuthService`]

pub mod auth;
pub mod memory;
pub mod profile;
pub mod session;

pub use auth::{AuthorizationGate, Feature, FeatureRule, FEATURE_TABLE};
pub use memory::{MemoryProfileStore, MemorySessionSource, StoreFault};
pub use profile::{DegradedReason, LoadOutcome, LoadResult, ProfileLoader};
pub use session::{
    AuthService, AuthSnapshot, AuthTransition, LoadRequest, LoadState, LoadStatus, Observation,
    PendingEdit, Phase, SessionMachine, Step,
};

use stockroom_core::{AuthError, StockroomError, StoreError};

/// Session-layer error type
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Profile store error: {0}")]
    Store(#[from] StoreError),

    #[error("Core error: {0}")]
    Core(#[from] StockroomError),

    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Profile not loaded yet: {message}")]
    ProfileUnavailable { message: String },

    #[error("Profile is read-only: {message}")]
    ReadOnlyProfile { message: String },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Auth service has shut down")]
    ShutDown,
}

pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// Create a profile-unavailable error
    pub fn profile_unavailable<S: Into<String>>(message: S) -> Self {
        Self::ProfileUnavailable {
            message: message.into(),
        }
    }

    /// Create a read-only error
    pub fn read_only<S: Into<String>>(message: S) -> Self {
        Self::ReadOnlyProfile {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the caller should surface this as a sign-in failure
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SessionError::Auth(_))
    }
}
