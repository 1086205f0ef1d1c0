//! Profile load results
//!
//! A load always yields a profile. When the store cannot deliver a real one,
//! the outcome carries a degraded profile together with the reason.

use serde::Serialize;
use std::time::Duration;
use stockroom_core::{Profile, StoreError};

/// Why a degraded profile was synthesized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "error", rename_all = "snake_case")]
pub enum DegradedReason {
    /// Fetch retries ran out on a non-"not found" error, or were refused outright
    FetchFailed(StoreError),
    /// Inserting the default profile failed for a reason other than uniqueness
    ProvisioningFailed(StoreError),
    /// A concurrent provisioning won, but re-reading its profile failed
    RefetchFailed(StoreError),
}

impl DegradedReason {
    pub fn error(&self) -> &StoreError {
        match self {
            DegradedReason::FetchFailed(error)
            | DegradedReason::ProvisioningFailed(error)
            | DegradedReason::RefetchFailed(error) => error,
        }
    }
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradedReason::FetchFailed(e) => write!(f, "fetch failed: {}", e),
            DegradedReason::ProvisioningFailed(e) => write!(f, "provisioning failed: {}", e),
            DegradedReason::RefetchFailed(e) => write!(f, "re-fetch after conflict failed: {}", e),
        }
    }
}

/// How the profile was obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "profile", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Read from the store
    Fetched(Profile),
    /// Inserted by this loader
    Provisioned(Profile),
    /// Inserted concurrently by someone else, then re-read
    Adopted(Profile),
    /// Synthesized locally; never persisted
    Degraded {
        profile: Profile,
        reason: DegradedReason,
    },
}

impl LoadOutcome {
    pub fn profile(&self) -> &Profile {
        match self {
            LoadOutcome::Fetched(profile)
            | LoadOutcome::Provisioned(profile)
            | LoadOutcome::Adopted(profile)
            | LoadOutcome::Degraded { profile, .. } => profile,
        }
    }

    pub fn into_profile(self) -> Profile {
        match self {
            LoadOutcome::Fetched(profile)
            | LoadOutcome::Provisioned(profile)
            | LoadOutcome::Adopted(profile)
            | LoadOutcome::Degraded { profile, .. } => profile,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LoadOutcome::Degraded { .. })
    }

    pub fn degraded_reason(&self) -> Option<&DegradedReason> {
        match self {
            LoadOutcome::Degraded { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Generation-tagged result of [`ProfileLoader::load`](super::ProfileLoader::load)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub user_id: String,
    /// Generation the load was requested under
    pub generation: u64,
    pub outcome: LoadOutcome,
    /// Fetch attempts made by the retry loop (excluding the post-conflict re-fetch)
    pub fetch_attempts: usize,
    /// Provisioning inserts issued
    pub inserts: usize,
    /// Time spent in backoff between fetch attempts
    pub backoff: Duration,
}

impl LoadResult {
    pub fn profile(&self) -> &Profile {
        self.outcome.profile()
    }

    pub fn is_degraded(&self) -> bool {
        self.outcome.is_degraded()
    }
}
