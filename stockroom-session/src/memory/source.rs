//! In-memory identity provider
//!
//! Holds a password account table and the current session, and broadcasts
//! session events the way a hosted provider's client library would. Tests
//! drive it directly to replay token refreshes, remote sign-outs and slow
//! startup snapshots.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stockroom_core::{AuthError, Session, SessionEvent, SessionEventKind, SessionSource};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
struct Account {
    user_id: String,
    password: String,
}

/// Identity provider double backed by process memory
#[derive(Debug)]
pub struct MemorySessionSource {
    /// Keyed by lowercased email
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
    ttl: chrono::Duration,
    snapshot_delay: Mutex<Option<Duration>>,
    snapshot_error: Mutex<Option<AuthError>>,
    sign_in_error: Mutex<Option<AuthError>>,
    sign_out_error: Mutex<Option<AuthError>>,
    snapshot_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl Default for MemorySessionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionSource {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUFFER)
    }

    /// Source whose event buffer holds `capacity` undelivered events
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            events,
            ttl: chrono::Duration::minutes(60),
            snapshot_delay: Mutex::new(None),
            snapshot_error: Mutex::new(None),
            sign_in_error: Mutex::new(None),
            sign_out_error: Mutex::new(None),
            snapshot_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Lifetime of sessions issued from now on
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Register a password account and return its new user id
    pub fn add_account(&self, email: &str, password: &str) -> String {
        let user_id = uuid::Uuid::new_v4().to_string();
        self.add_account_with_id(&user_id, email, password);
        user_id
    }

    /// Register a password account under a known user id
    pub fn add_account_with_id(&self, user_id: &str, email: &str, password: &str) {
        self.accounts.write().insert(
            email.trim().to_lowercase(),
            Account {
                user_id: user_id.to_string(),
                password: password.to_string(),
            },
        );
    }

    /// Install a session silently, as if persisted from a previous run
    pub fn restore_session(&self, user_id: &str, email: Option<&str>) -> Session {
        let session = Session::issue(user_id, email.map(str::to_string), self.ttl);
        *self.current.write() = Some(session.clone());
        session
    }

    /// Session the provider currently considers active
    pub fn session(&self) -> Option<Session> {
        self.current.read().clone()
    }

    /// Broadcast an arbitrary event without touching the current session
    pub fn emit(&self, kind: SessionEventKind, session: Option<Session>) {
        debug!(kind = %kind, "Emitting session event");
        // No receivers is not an error for a provider
        let _ = self.events.send(SessionEvent::new(kind, session));
    }

    /// Rotate the current session's tokens and announce it
    pub fn refresh_token(&self) -> Option<Session> {
        let refreshed = {
            let mut current = self.current.write();
            let refreshed = current.as_ref()?.refreshed(self.ttl);
            *current = Some(refreshed.clone());
            refreshed
        };
        self.emit(SessionEventKind::TokenRefreshed, Some(refreshed.clone()));
        Some(refreshed)
    }

    /// Sign a user in out-of-band, e.g. from another tab
    pub fn switch_user(&self, user_id: &str, email: Option<&str>) -> Session {
        let session = self.restore_session(user_id, email);
        self.emit(SessionEventKind::SignedIn, Some(session.clone()));
        session
    }

    /// Drop the session provider-side, e.g. revoked or expired
    ///
    /// The event carries the session that ended.
    pub fn revoke(&self) {
        let ended = self.current.write().take();
        self.emit(SessionEventKind::SignedOut, ended);
    }

    /// Delay every following snapshot read
    pub fn set_snapshot_delay(&self, delay: Option<Duration>) {
        *self.snapshot_delay.lock() = delay;
    }

    /// Fail the next snapshot read
    pub fn fail_next_snapshot(&self, error: AuthError) {
        *self.snapshot_error.lock() = Some(error);
    }

    /// Fail the next sign-in regardless of credentials
    pub fn fail_next_sign_in(&self, error: AuthError) {
        *self.sign_in_error.lock() = Some(error);
    }

    /// Fail the next remote sign-out
    pub fn fail_next_sign_out(&self, error: AuthError) {
        *self.sign_out_error.lock() = Some(error);
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl SessionSource for MemorySessionSource {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.snapshot_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.snapshot_error.lock().take() {
            return Err(error);
        }

        Ok(self.session())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        if let Some(error) = self.sign_in_error.lock().take() {
            return Err(error);
        }

        let email = email.trim().to_lowercase();
        let account = self
            .accounts
            .read()
            .get(&email)
            .cloned()
            .ok_or(AuthError::InvalidCredentials)?;
        if account.password != password {
            return Err(AuthError::InvalidCredentials);
        }

        let session = Session::issue(account.user_id, Some(email), self.ttl);
        *self.current.write() = Some(session.clone());
        info!(user_id = %session.user_id, "Password sign-in succeeded");

        self.emit(SessionEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.sign_out_error.lock().take() {
            return Err(error);
        }

        let ended = self.current.write().take();
        self.emit(SessionEventKind::SignedOut, ended);
        Ok(())
    }
}
