//! Session state types
//!
//! Values describing where the session state machine stands, what it has
//! observed and what it announces to consumers.

use crate::auth::AuthorizationGate;
use serde::Serialize;
use stockroom_core::{Identity, Profile, Role, Session, SessionEvent, SessionEventKind};

/// Top-level authentication phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Service constructed, nothing requested yet
    Uninitialized,
    /// Waiting for the initial snapshot or first live event
    Initializing,
    Authenticated,
    Unauthenticated,
}

impl Phase {
    /// Whether the initial session state is still unknown
    pub fn is_initial(&self) -> bool {
        matches!(self, Phase::Uninitialized | Phase::Initializing)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Uninitialized => write!(f, "uninitialized"),
            Phase::Initializing => write!(f, "initializing"),
            Phase::Authenticated => write!(f, "authenticated"),
            Phase::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Progress of the profile load for the current identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Idle,
    Loading,
    /// A real profile is cached
    Ready,
    /// The load ended on the degraded fallback
    Failed,
}

impl LoadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadStatus::Ready | LoadStatus::Failed)
    }
}

/// Load status tagged with the generation it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadState {
    pub status: LoadStatus,
    pub generation: u64,
}

impl LoadState {
    pub fn idle(generation: u64) -> Self {
        Self {
            status: LoadStatus::Idle,
            generation,
        }
    }
}

impl Default for LoadState {
    fn default() -> Self {
        Self::idle(0)
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Result of the one-shot startup read; `None` also covers failures
    Snapshot(Option<Session>),
    /// Live notification from the identity provider
    Event(SessionEvent),
    /// Re-read after the event stream fell behind
    Resync(Option<Session>),
    /// Session returned by a successful local sign-in
    SignIn(Session),
    /// Local sign-out, applied before the provider is told
    LocalSignOut,
}

impl Observation {
    /// Session this observation says should be current
    pub fn session(&self) -> Option<&Session> {
        match self {
            Observation::Snapshot(session) | Observation::Resync(session) => session.as_ref(),
            Observation::Event(event) if event.kind == SessionEventKind::SignedOut => None,
            Observation::Event(event) => event.session.as_ref(),
            Observation::SignIn(session) => Some(session),
            Observation::LocalSignOut => None,
        }
    }

    /// Short label used in logs
    pub fn source(&self) -> &'static str {
        match self {
            Observation::Snapshot(_) => "snapshot",
            Observation::Event(_) => "event",
            Observation::Resync(_) => "resync",
            Observation::SignIn(_) => "sign_in",
            Observation::LocalSignOut => "local_sign_out",
        }
    }
}

/// Profile load the machine wants started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub user_id: String,
    pub generation: u64,
}

/// Notable state change, broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum AuthTransition {
    Initializing,
    /// A session for a new identity was established
    SignedIn { user_id: String, generation: u64 },
    /// A session for another identity replaced the current one
    IdentitySwitched {
        from: String,
        to: String,
        generation: u64,
    },
    /// Same identity, new session material
    SessionReplaced { user_id: String },
    /// Session and profile cleared; `user_id` is `None` when nobody was signed in
    SignedOut {
        user_id: Option<String>,
        generation: u64,
    },
    LoadStarted { user_id: String, generation: u64 },
    ProfileReady {
        user_id: String,
        generation: u64,
        role: Role,
    },
    /// The load ended degraded; `kept_cached` when a real profile stayed in place
    ProfileDegraded {
        user_id: String,
        generation: u64,
        kept_cached: bool,
    },
    StaleLoadDiscarded {
        user_id: String,
        generation: u64,
        current_generation: u64,
    },
    /// An edit was applied locally ahead of the store
    ProfileEdited { user_id: String },
    /// The store accepted an edit
    ProfileSaved { user_id: String },
    /// The store rejected an edit and the previous profile was restored
    ProfileReverted { user_id: String },
    ShutDown,
}

/// Result of feeding one input to the machine
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    pub transitions: Vec<AuthTransition>,
    pub load: Option<LoadRequest>,
}

impl Step {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.load.is_none()
    }

    pub(crate) fn push(&mut self, transition: AuthTransition) {
        self.transitions.push(transition);
    }
}

/// Consistent view of the authentication state at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSnapshot {
    pub phase: Phase,
    pub identity: Option<Identity>,
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    pub load: LoadState,
    pub loading: bool,
}

impl AuthSnapshot {
    /// Authorization decisions for this snapshot's profile
    pub fn gate(&self) -> AuthorizationGate {
        AuthorizationGate::new(self.profile.as_ref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_out_event_ignores_attached_session() {
        let session = Session::issue("user-1", None, chrono::Duration::minutes(5));
        let observation = Observation::Event(SessionEvent::new(
            SessionEventKind::SignedOut,
            Some(session.clone()),
        ));
        assert!(observation.session().is_none());

        let observation =
            Observation::Event(SessionEvent::new(SessionEventKind::TokenRefreshed, Some(session)));
        assert_eq!(observation.session().map(|s| s.user_id.as_str()), Some("user-1"));
    }

    #[test]
    fn test_transition_serialization() {
        let json = serde_json::to_value(AuthTransition::LoadStarted {
            user_id: "user-1".to_string(),
            generation: 3,
        })
        .unwrap();

        assert_eq!(json["transition"], "load_started");
        assert_eq!(json["generation"], 3);
    }
}
