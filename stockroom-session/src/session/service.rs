//! Auth Service - async driver around the session state machine
//!
//! Built once at startup and shared by cloning. It subscribes to the
//! identity provider, reads the initial session, runs profile loads on
//! background tasks and publishes every change on a `watch` channel
//! (current state) and a `broadcast` channel (transitions).
//!
//! All state lives in one [`SessionMachine`] behind a `parking_lot::Mutex`.
//! The lock is only ever taken for synchronous work, so inputs are applied
//! one at a time in arrival order.

use super::machine::SessionMachine;
use super::state::{AuthSnapshot, AuthTransition, LoadRequest, LoadState, Observation, Step};
use crate::auth::AuthorizationGate;
use crate::profile::ProfileLoader;
use crate::{SessionError, SessionResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use stockroom_core::{
    with_timeout, Identity, Profile, ProfilePatch, ProfileStore, Session, SessionConfig,
    SessionEvent, SessionSource, StockroomConfig, StoreError,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

const TRANSITION_BUFFER: usize = 128;

/// Shared handle to the current authentication state
#[derive(Clone)]
pub struct AuthService {
    inner: Arc<Inner>,
}

struct Inner {
    machine: Mutex<SessionMachine>,
    source: Arc<dyn SessionSource>,
    store: Arc<dyn ProfileStore>,
    loader: ProfileLoader,
    session_config: SessionConfig,
    state: watch::Sender<AuthSnapshot>,
    transitions: broadcast::Sender<AuthTransition>,
    /// Event pump, snapshot read and profile loads
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl AuthService {
    /// Build the service and begin initialization
    ///
    /// Must be called from within a tokio runtime. The returned service is
    /// `loading` until the initial snapshot or the first live event resolves.
    pub fn start(
        source: Arc<dyn SessionSource>,
        store: Arc<dyn ProfileStore>,
        config: &StockroomConfig,
    ) -> Self {
        let service = Self::new(source, store, config);
        service.initialize();
        service
    }

    /// Build the service without touching the provider
    ///
    /// Lets callers subscribe to [`transitions`](Self::transitions) before
    /// [`initialize`](Self::initialize) announces `Initializing`.
    pub fn new(
        source: Arc<dyn SessionSource>,
        store: Arc<dyn ProfileStore>,
        config: &StockroomConfig,
    ) -> Self {
        let machine = SessionMachine::new();
        let (state, _) = watch::channel(machine.snapshot());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

        Self {
            inner: Arc::new(Inner {
                machine: Mutex::new(machine),
                loader: ProfileLoader::new(store.clone(), config.profile.clone()),
                source,
                store,
                session_config: config.session.clone(),
                state,
                transitions,
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to the provider and request the initial session; no-op after the first call
    pub fn initialize(&self) {
        // Subscribe before reading the snapshot so no event falls in between
        let events = self.inner.source.subscribe();
        {
            let mut machine = self.inner.machine.lock();
            let step = machine.start();
            if step.is_empty() {
                return;
            }
            self.publish(&machine, step);
        }

        let pump = tokio::spawn(pump_events(Arc::downgrade(&self.inner), events));
        self.track(pump);
        let snapshot = tokio::spawn(self.clone().read_initial_session());
        self.track(snapshot);

        info!("Auth service started");
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.machine.lock().identity()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.machine.lock().session().cloned()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.inner.machine.lock().profile().cloned()
    }

    pub fn loading(&self) -> bool {
        self.inner.machine.lock().loading()
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.machine.lock().load_state()
    }

    pub fn generation(&self) -> u64 {
        self.inner.machine.lock().generation()
    }

    /// All observable values taken under one lock
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.machine.lock().snapshot()
    }

    /// Authorization decisions for the currently cached profile
    pub fn gate(&self) -> AuthorizationGate {
        self.inner.machine.lock().gate()
    }

    /// Receiver notified whenever the snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    /// Receiver of transitions applied from now on
    pub fn transitions(&self) -> broadcast::Receiver<AuthTransition> {
        self.inner.transitions.subscribe()
    }

    /// Wait until nothing is loading and return the state at that point
    pub async fn wait_until_settled(&self) -> AuthSnapshot {
        let mut state = self.inner.state.subscribe();
        let settled = match state.wait_for(|snapshot| !snapshot.loading).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    /// Password sign-in; provider errors are returned unchanged
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> SessionResult<()> {
        self.ensure_running()?;
        if email.trim().is_empty() {
            return Err(SessionError::validation("email is required"));
        }

        let session = self
            .inner
            .source
            .sign_in_with_password(email, password)
            .await
            .map_err(|error| {
                warn!(error = %error, "Sign-in rejected");
                SessionError::Auth(error)
            })?;

        self.observe(Observation::SignIn(session));
        Ok(())
    }

    /// Clear the local session at once, then tell the provider
    ///
    /// A failed remote sign-out is logged and otherwise ignored.
    pub async fn sign_out(&self) -> SessionResult<()> {
        self.observe(Observation::LocalSignOut);

        if let Err(error) = self.inner.source.sign_out().await {
            warn!(error = %error, "Remote sign-out failed, local session already cleared");
        }
        Ok(())
    }

    /// Edit the current profile, showing the change before the store confirms it
    #[instrument(skip(self))]
    pub async fn update_profile(&self, patch: ProfilePatch) -> SessionResult<Profile> {
        self.ensure_running()?;
        if patch.is_empty() {
            return Err(SessionError::validation("nothing to update"));
        }
        if patch
            .display_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(SessionError::validation("display name cannot be empty"));
        }

        let pending = {
            let mut machine = self.inner.machine.lock();
            let (pending, step) = machine.begin_edit(&patch)?;
            self.publish(&machine, step);
            pending
        };

        let saved = with_timeout(
            self.inner.store.update(&pending.user_id, patch),
            self.inner.loader.config().write_timeout_ms,
            "profile.update",
        )
        .await
        .map_err(StoreError::from)
        .and_then(|result| result);

        match saved {
            Ok(profile) => {
                debug!(user_id = %profile.user_id, "Profile update saved");
                self.apply(|machine| machine.commit_edit(profile.clone()));
                Ok(profile)
            }
            Err(error) => {
                warn!(user_id = %pending.user_id, error = %error, "Profile update rejected, reverting");
                self.apply(|machine| machine.revert_edit(pending));
                Err(error.into())
            }
        }
    }

    /// Reload the current identity's profile under a new generation
    ///
    /// Fails with [`SessionError::ShutDown`] once the service has shut down.
    pub fn refresh_profile(&self) -> SessionResult<u64> {
        let mut machine = self.inner.machine.lock();
        let step = machine.refresh()?;
        let generation = machine.generation();
        self.publish(&machine, step);
        Ok(generation)
    }

    /// Stop listening to the provider and abandon in-flight work
    ///
    /// Anything still loading is settled, so `wait_until_settled` returns.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }

        self.apply(SessionMachine::halt);
        info!(aborted_tasks = tasks.len(), "Auth service shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> SessionResult<()> {
        if self.is_shut_down() {
            return Err(SessionError::ShutDown);
        }
        Ok(())
    }

    fn observe(&self, observation: Observation) {
        self.apply(|machine| machine.observe(observation));
    }

    fn apply<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionMachine) -> Step,
    {
        let mut machine = self.inner.machine.lock();
        let step = f(&mut machine);
        self.publish(&machine, step);
    }

    /// Announce a step; called with the machine lock held so order is preserved
    fn publish(&self, machine: &SessionMachine, step: Step) {
        if step.is_empty() {
            return;
        }
        if let Err(violation) = machine.check_invariants() {
            error!(violation = %violation, "Session invariant violated");
        }

        for transition in step.transitions {
            let _ = self.inner.transitions.send(transition);
        }

        let snapshot = machine.snapshot();
        self.inner.state.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        if let Some(request) = step.load {
            self.spawn_load(request);
        }
    }

    fn spawn_load(&self, request: LoadRequest) {
        if self.is_shut_down() {
            debug!(user_id = %request.user_id, "Service shut down, not loading profile");
            return;
        }

        let service = self.clone();
        let handle = tokio::spawn(async move {
            let result = service
                .inner
                .loader
                .load(&request.user_id, request.generation)
                .await;
            service.apply(|machine| machine.apply_load(result));
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn read_initial_session(self) {
        let session = self.read_session("session.snapshot").await.unwrap_or_else(|| {
            debug!("No initial session available");
            None
        });
        self.observe(Observation::Snapshot(session));
    }

    async fn resync(&self) {
        match self.read_session("session.resync").await {
            Some(session) => self.observe(Observation::Resync(session)),
            None => warn!("Resync failed, keeping current session state"),
        }
    }

    /// Time-bounded one-shot read; `None` when the provider failed or timed out
    async fn read_session(&self, operation: &str) -> Option<Option<Session>> {
        let timeout_ms = self.inner.session_config.initial_session_timeout_ms;
        match with_timeout(self.inner.source.current_session(), timeout_ms, operation).await {
            Ok(Ok(session)) => Some(session),
            Ok(Err(error)) => {
                warn!(operation, error = %error, "Session read failed");
                None
            }
            Err(error) => {
                warn!(operation, error = %error, "Session read timed out");
                None
            }
        }
    }
}

/// Forward provider events into the machine until the stream or the service goes away
async fn pump_events(inner: Weak<Inner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let received = events.recv().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let service = AuthService { inner };

        match received {
            Ok(event) => {
                debug!(kind = %event.kind, "Session event received");
                service.observe(Observation::Event(event));
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session events dropped, resynchronizing");
                service.resync().await;
            }
            Err(RecvError::Closed) => {
                debug!("Session event stream closed");
                break;
            }
        }
    }
}
