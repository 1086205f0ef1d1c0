//! Core trait definitions for external collaborators

use crate::error::{AuthError, StoreError};
use crate::types::*;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Store of authorization profiles keyed by user id
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile belonging to `user_id`
    async fn get_by_user_id(&self, user_id: &str) -> Result<Profile, StoreError>;

    /// Insert a new profile; fails with `UniqueViolation` if one already exists
    async fn insert(&self, fields: NewProfile) -> Result<Profile, StoreError>;

    /// Apply a partial update and return the stored result
    async fn update(&self, user_id: &str, patch: ProfilePatch) -> Result<Profile, StoreError>;
}

/// Identity provider session source
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// One-shot read of the current session
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Subscribe to session changes; dropping the receiver unsubscribes
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Authenticate with email and password
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, AuthError>;

    /// Invalidate the current session remotely
    async fn sign_out(&self) -> Result<(), AuthError>;
}
