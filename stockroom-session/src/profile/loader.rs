//! Profile Loader
//!
//! Every store call is bounded by the configured timeout, which counts as a
//! transient failure. Store errors never escape: the loader always returns a
//! profile, falling back to a degraded one when nothing better is available.

use super::outcome::{DegradedReason, LoadOutcome, LoadResult};
use futures::FutureExt;
use std::sync::Arc;
use stockroom_core::{
    retry_async, with_timeout, NewProfile, Profile, ProfileConfig, ProfileStore, StoreError,
};
use tracing::{debug, info, instrument, warn};

/// Resolves profiles against a [`ProfileStore`]
#[derive(Clone)]
pub struct ProfileLoader {
    store: Arc<dyn ProfileStore>,
    config: ProfileConfig,
}

impl ProfileLoader {
    pub fn new(store: Arc<dyn ProfileStore>, config: ProfileConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Resolve the profile for `user_id`, tagging the result with `generation`
    #[instrument(skip(self))]
    pub async fn load(&self, user_id: &str, generation: u64) -> LoadResult {
        let retry = self.config.retry_config();
        let retry_not_found = self.config.retry_not_found;

        let fetched = retry_async(
            |_attempt| self.fetch_once(user_id).boxed(),
            &retry,
            "profile.fetch",
            |error: &StoreError| error.is_transient() || (retry_not_found && error.is_not_found()),
        )
        .await;

        let mut inserts = 0;
        let outcome = match fetched.result {
            Ok(profile) => {
                debug!(user_id, attempts = fetched.attempts, "Profile fetched");
                LoadOutcome::Fetched(profile)
            }
            Err(error) if error.is_not_found() => {
                inserts += 1;
                self.provision(user_id).await
            }
            Err(error) => degraded(user_id, DegradedReason::FetchFailed(error)),
        };

        LoadResult {
            user_id: user_id.to_string(),
            generation,
            outcome,
            fetch_attempts: fetched.attempts,
            inserts,
            backoff: fetched.total_delay,
        }
    }

    /// Single time-bounded fetch
    async fn fetch_once(&self, user_id: &str) -> Result<Profile, StoreError> {
        with_timeout(
            self.store.get_by_user_id(user_id),
            self.config.fetch_timeout_ms,
            "profile.get",
        )
        .await?
    }

    /// Insert the default profile; a uniqueness conflict means another
    /// client provisioned first, so its row is re-read instead
    async fn provision(&self, user_id: &str) -> LoadOutcome {
        let fields = NewProfile::provisioned(user_id, &self.config.placeholder_display_name);

        let inserted = with_timeout(
            self.store.insert(fields),
            self.config.fetch_timeout_ms,
            "profile.insert",
        )
        .await
        .map_err(StoreError::from)
        .and_then(|result| result);

        match inserted {
            Ok(profile) => {
                info!(user_id, profile_id = %profile.id, "Provisioned default profile");
                LoadOutcome::Provisioned(profile)
            }
            Err(StoreError::UniqueViolation { .. }) => {
                debug!(user_id, "Profile provisioned concurrently, re-fetching");
                match self.fetch_once(user_id).await {
                    Ok(profile) => LoadOutcome::Adopted(profile),
                    Err(error) => degraded(user_id, DegradedReason::RefetchFailed(error)),
                }
            }
            Err(error) => degraded(user_id, DegradedReason::ProvisioningFailed(error)),
        }
    }
}

fn degraded(user_id: &str, reason: DegradedReason) -> LoadOutcome {
    warn!(user_id, reason = %reason, "Falling back to degraded profile");
    LoadOutcome::Degraded {
        profile: Profile::degraded(user_id),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProfileStore, StoreFault};
    use std::time::Duration;
    use stockroom_core::Role;

    fn config() -> ProfileConfig {
        ProfileConfig {
            fetch_timeout_ms: 15,
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 1_000,
            ..ProfileConfig::default()
        }
    }

    fn loader(store: &Arc<MemoryProfileStore>) -> ProfileLoader {
        ProfileLoader::new(store.clone(), config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_profile_is_fetched_once() {
        let store = Arc::new(MemoryProfileStore::new());
        let seeded = store.seed("user-1", "Sam", Role::Manager);

        let result = loader(&store).load("user-1", 4).await;

        assert_eq!(result.generation, 4);
        assert_eq!(result.outcome, LoadOutcome::Fetched(seeded));
        assert_eq!(result.fetch_attempts, 1);
        assert_eq!(result.inserts, 0);
        assert_eq!(result.backoff, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_error_is_not_retried() {
        let store = Arc::new(MemoryProfileStore::new());
        store.seed("user-1", "Sam", Role::Admin);
        store.fail_next_get(StoreFault::Permission);

        let result = loader(&store).load("user-1", 1).await;

        assert!(result.is_degraded());
        assert!(result.profile().is_degraded());
        assert_eq!(result.fetch_attempts, 1);
        assert!(matches!(
            result.outcome.degraded_reason(),
            Some(DegradedReason::FetchFailed(StoreError::Permission { .. }))
        ));
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_provisions_without_retry_when_disabled() {
        let store = Arc::new(MemoryProfileStore::new());
        let loader = ProfileLoader::new(
            store.clone(),
            ProfileConfig {
                retry_not_found: false,
                ..config()
            },
        );

        let result = loader.load("user-9", 1).await;

        assert!(matches!(result.outcome, LoadOutcome::Provisioned(_)));
        assert_eq!(result.fetch_attempts, 1);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_failure_degrades() {
        let store = Arc::new(MemoryProfileStore::new());
        store.fail_next_insert(StoreFault::Transient);

        let result = loader(&store).load("user-1", 1).await;

        assert!(matches!(
            result.outcome.degraded_reason(),
            Some(DegradedReason::ProvisioningFailed(StoreError::Transient { .. }))
        ));
        assert_eq!(result.inserts, 1);
        assert!(store.get_profile("user-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_failure_after_conflict_degrades() {
        let store = Arc::new(MemoryProfileStore::new());
        store.fail_next_insert(StoreFault::UniqueViolation);
        // Four not-found attempts, then the re-fetch after the conflict fails
        for _ in 0..4 {
            store.fail_next_get(StoreFault::NotFound);
        }
        store.fail_next_get(StoreFault::Transient);

        let result = loader(&store).load("user-1", 1).await;

        assert!(matches!(
            result.outcome.degraded_reason(),
            Some(DegradedReason::RefetchFailed(StoreError::Transient { .. }))
        ));
        assert_eq!(store.get_calls(), 5);
    }
}
