//! In-memory profile store

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stockroom_core::{NewProfile, Profile, ProfilePatch, ProfileStore, Role, StoreError};
use tracing::debug;

/// Scripted outcome for the next call of one store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    Transient,
    NotFound,
    Permission,
    UniqueViolation,
    /// Stall for the given time, then perform the call normally
    Delay(Duration),
}

/// Profile store backed by a `HashMap`, enforcing one profile per user
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
    get_faults: Mutex<VecDeque<StoreFault>>,
    insert_faults: Mutex<VecDeque<StoreFault>>,
    update_faults: Mutex<VecDeque<StoreFault>>,
    /// Added to every call
    latency: Mutex<Option<Duration>>,
    get_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every call takes `latency`
    pub fn with_latency(latency: Duration) -> Self {
        let store = Self::default();
        store.set_latency(Some(latency));
        store
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Insert a profile directly, bypassing faults and counters
    pub fn seed(&self, user_id: &str, display_name: &str, role: Role) -> Profile {
        let mut fields = NewProfile::provisioned(user_id, display_name);
        fields.role = role;
        let profile = Profile::from_new(uuid::Uuid::new_v4().to_string(), fields);
        self.profiles
            .write()
            .insert(user_id.to_string(), profile.clone());
        profile
    }

    /// Current stored profile, bypassing faults and counters
    pub fn get_profile(&self, user_id: &str) -> Option<Profile> {
        self.profiles.read().get(user_id).cloned()
    }

    /// Administrative deletion
    pub fn remove(&self, user_id: &str) -> Option<Profile> {
        self.profiles.write().remove(user_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }

    pub fn fail_next_get(&self, fault: StoreFault) {
        self.get_faults.lock().push_back(fault);
    }

    pub fn fail_next_insert(&self, fault: StoreFault) {
        self.insert_faults.lock().push_back(fault);
    }

    pub fn fail_next_update(&self, fault: StoreFault) {
        self.update_faults.lock().push_back(fault);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Apply latency and the scripted fault, if any
    async fn simulate(&self, fault: Option<StoreFault>, user_id: &str) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let Some(fault) = fault else {
            return Ok(());
        };
        debug!(user_id, fault = ?fault, "Injecting store fault");

        match fault {
            StoreFault::Transient => Err(StoreError::transient("connection reset")),
            StoreFault::NotFound => Err(StoreError::not_found(user_id)),
            StoreFault::Permission => Err(StoreError::permission("row level security")),
            StoreFault::UniqueViolation => Err(StoreError::UniqueViolation {
                user_id: user_id.to_string(),
            }),
            StoreFault::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_by_user_id(&self, user_id: &str) -> Result<Profile, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.get_faults.lock().pop_front();
        self.simulate(fault, user_id).await?;

        self.get_profile(user_id)
            .ok_or_else(|| StoreError::not_found(user_id))
    }

    async fn insert(&self, fields: NewProfile) -> Result<Profile, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.insert_faults.lock().pop_front();
        self.simulate(fault, &fields.user_id).await?;

        let mut profiles = self.profiles.write();
        if profiles.contains_key(&fields.user_id) {
            return Err(StoreError::UniqueViolation {
                user_id: fields.user_id,
            });
        }

        let user_id = fields.user_id.clone();
        let profile = Profile::from_new(uuid::Uuid::new_v4().to_string(), fields);
        profiles.insert(user_id, profile.clone());
        Ok(profile)
    }

    async fn update(&self, user_id: &str, patch: ProfilePatch) -> Result<Profile, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.update_faults.lock().pop_front();
        self.simulate(fault, user_id).await?;

        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found(user_id))?;
        profile.apply_patch(&patch);
        Ok(profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_enforces_uniqueness() {
        let store = MemoryProfileStore::new();

        let first = store
            .insert(NewProfile::provisioned("user-1", "Sam"))
            .await
            .unwrap();
        let second = store.insert(NewProfile::provisioned("user-1", "Other")).await;

        assert!(matches!(second, Err(StoreError::UniqueViolation { .. })));
        assert_eq!(store.get_by_user_id("user-1").await.unwrap(), first);
        assert_eq!(store.len(), 1);
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_faults_are_consumed_in_order() {
        let store = MemoryProfileStore::new();
        store.seed("user-1", "Sam", Role::Staff);
        store.fail_next_get(StoreFault::Transient);
        store.fail_next_get(StoreFault::Permission);

        assert!(matches!(
            store.get_by_user_id("user-1").await,
            Err(StoreError::Transient { .. })
        ));
        assert!(matches!(
            store.get_by_user_id("user-1").await,
            Err(StoreError::Permission { .. })
        ));
        assert!(store.get_by_user_id("user-1").await.is_ok());
        assert_eq!(store.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_update_missing_profile() {
        let store = MemoryProfileStore::new();
        let result = store
            .update("ghost", ProfilePatch::default().display_name("Boo"))
            .await;

        assert_eq!(result, Err(StoreError::not_found("ghost")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_fault_stalls_call() {
        let store = MemoryProfileStore::new();
        store.seed("user-1", "Sam", Role::Staff);
        store.fail_next_get(StoreFault::Delay(Duration::from_millis(40)));

        let start = tokio::time::Instant::now();
        assert!(store.get_by_user_id("user-1").await.is_ok());
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }
}
