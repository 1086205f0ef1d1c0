//! Profile loader retry, provisioning and fallback behavior

mod common;

use std::sync::Arc;
use std::time::Duration;
use stockroom_core::{Role, StoreError};
use stockroom_session::{DegradedReason, LoadOutcome, MemoryProfileStore, ProfileLoader, StoreFault};
use tokio::time::Instant;

fn loader(store: &Arc<MemoryProfileStore>) -> ProfileLoader {
    common::init_logging();
    ProfileLoader::new(store.clone(), common::test_config().profile)
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let store = Arc::new(MemoryProfileStore::new());
    let seeded = store.seed("user-1", "Sam", Role::Staff);
    store.fail_next_get(StoreFault::Transient);
    store.fail_next_get(StoreFault::Transient);

    let loader = loader(&store);
    let start = Instant::now();
    let result = loader.load("user-1", 7).await;

    let expected = loader.config().retry_config().cumulative_delay(2);
    assert_eq!(expected, Duration::from_millis(30));
    assert_eq!(result.fetch_attempts, 3);
    assert_eq!(result.backoff, expected);
    assert_eq!(start.elapsed(), expected);
    assert_eq!(result.outcome, LoadOutcome::Fetched(seeded));
    assert_eq!(result.generation, 7);
}

#[tokio::test(start_paused = true)]
async fn test_always_missing_provisions_once() {
    let store = Arc::new(MemoryProfileStore::new());

    let result = loader(&store).load("user-1", 1).await;

    let LoadOutcome::Provisioned(profile) = &result.outcome else {
        panic!("expected provisioned profile, got {:?}", result.outcome);
    };
    assert_eq!(profile.role, Role::Staff);
    assert_eq!(profile.display_name, "New staff member");
    assert!(profile.phone.is_none());
    assert!(!profile.is_degraded());

    assert_eq!(result.fetch_attempts, 4);
    assert_eq!(result.backoff, Duration::from_millis(70));
    assert_eq!(result.inserts, 1);
    assert_eq!(store.insert_calls(), 1);
    assert_eq!(store.get_profile("user-1").as_ref(), Some(profile));
}

#[tokio::test(start_paused = true)]
async fn test_late_provisioning_is_picked_up_by_retry() {
    let store = Arc::new(MemoryProfileStore::new());
    store.fail_next_get(StoreFault::NotFound);
    let seeded = store.seed("user-1", "Sam", Role::Manager);

    let result = loader(&store).load("user-1", 1).await;

    assert_eq!(result.outcome, LoadOutcome::Fetched(seeded));
    assert_eq!(result.fetch_attempts, 2);
    assert_eq!(store.insert_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_provisioning_converges() {
    let store = Arc::new(MemoryProfileStore::new());
    // Both loaders exhaust their not-found retries before either inserts
    for _ in 0..8 {
        store.fail_next_get(StoreFault::NotFound);
    }

    let first = loader(&store);
    let second = loader(&store);
    let (a, b) = tokio::join!(first.load("user-1", 1), second.load("user-1", 1));

    assert!(!a.is_degraded());
    assert!(!b.is_degraded());
    assert_eq!(a.profile(), b.profile());
    assert_eq!(store.insert_calls(), 2);
    assert_eq!(store.len(), 1);

    let adopted = [&a, &b]
        .iter()
        .filter(|result| matches!(result.outcome, LoadOutcome::Adopted(_)))
        .count();
    assert_eq!(adopted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_timeouts_degrade_within_bound() {
    let store = Arc::new(MemoryProfileStore::with_latency(Duration::from_millis(50)));
    store.seed("user-1", "Sam", Role::Admin);

    let loader = loader(&store);
    let start = Instant::now();
    let result = loader.load("user-1", 1).await;

    // Four attempts of 15ms plus backoff of 10, 20 and 40ms
    assert_eq!(start.elapsed(), Duration::from_millis(130));
    assert!(matches!(
        result.outcome.degraded_reason(),
        Some(DegradedReason::FetchFailed(StoreError::Timeout { .. }))
    ));
    assert_eq!(result.profile().user_id, "user-1");
    assert_eq!(result.profile().role, Role::Staff);
    assert_eq!(store.insert_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unique_violation_is_treated_as_success() {
    let store = Arc::new(MemoryProfileStore::new());
    for _ in 0..4 {
        store.fail_next_get(StoreFault::NotFound);
    }
    // Another client provisions while this loader is still retrying
    let theirs = store.seed("user-1", "Other device", Role::Staff);
    store.fail_next_insert(StoreFault::UniqueViolation);

    let result = loader(&store).load("user-1", 1).await;

    assert_eq!(result.outcome, LoadOutcome::Adopted(theirs));
    assert_eq!(store.get_calls(), 5);
}
