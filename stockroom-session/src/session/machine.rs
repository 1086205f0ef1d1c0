//! Session State Machine
//!
//! Synchronous owner of the session, the cached profile and the generation
//! counter. Every input is applied in one call and answered with a [`Step`]
//! naming the transitions to publish and, when needed, the profile load to
//! start. The machine never awaits; the async driving lives in
//! [`AuthService`](super::AuthService).

use super::state::{
    AuthSnapshot, AuthTransition, LoadRequest, LoadState, LoadStatus, Observation, Phase, Step,
};
use crate::auth::AuthorizationGate;
use crate::profile::LoadResult;
use crate::{SessionError, SessionResult};
use stockroom_core::{Identity, Profile, ProfilePatch, Session, SessionEvent};
use tracing::{debug, info, warn};

/// Edit applied ahead of the store, kept so it can be undone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub user_id: String,
    /// Load generation the edit was made under
    pub generation: u64,
    /// Cached profile before the edit
    pub previous: Profile,
    /// Cached profile right after the edit
    pub optimistic: Profile,
}

#[derive(Debug)]
pub struct SessionMachine {
    phase: Phase,
    session: Option<Session>,
    profile: Option<Profile>,
    load: LoadState,
    /// Last session cleared by a local sign-out
    signed_out: Option<Session>,
    halted: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            session: None,
            profile: None,
            load: LoadState::default(),
            signed_out: None,
            halted: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.as_ref().map(Session::identity)
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    pub fn generation(&self) -> u64 {
        self.load.generation
    }

    /// True until the initial state is known, and while a load is in flight
    pub fn loading(&self) -> bool {
        self.phase.is_initial() || self.load.status == LoadStatus::Loading
    }

    pub fn gate(&self) -> AuthorizationGate {
        AuthorizationGate::new(self.profile.as_ref())
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        AuthSnapshot {
            phase: self.phase,
            identity: self.identity(),
            session: self.session.clone(),
            profile: self.profile.clone(),
            load: self.load,
            loading: self.loading(),
        }
    }

    /// Uninitialized -> Initializing; no-op afterwards
    pub fn start(&mut self) -> Step {
        let mut step = Step::none();
        if self.phase == Phase::Uninitialized {
            self.phase = Phase::Initializing;
            step.push(AuthTransition::Initializing);
        }
        step
    }

    /// Apply a session observation from any source
    pub fn observe(&mut self, observation: Observation) -> Step {
        if let Observation::Snapshot(_) = observation {
            if !self.phase.is_initial() {
                debug!(phase = %self.phase, "Ignoring late session snapshot");
                return Step::none();
            }
        }

        let source = observation.source();
        match (observation.session().cloned(), &observation) {
            (Some(_), _) if self.halted => {
                debug!(source, "Service halted, ignoring session");
                Step::none()
            }
            (Some(session), Observation::Event(_) | Observation::Resync(_))
                if self.was_signed_out(&session) =>
            {
                debug!(
                    user_id = %session.user_id,
                    source,
                    "Ignoring session cleared by local sign-out"
                );
                Step::none()
            }
            (Some(session), _) => self.establish(session, source),
            (None, Observation::Event(event)) if self.ends_older_session(event) => {
                debug!(source, "Ignoring sign-out of an older session");
                Step::none()
            }
            (None, Observation::LocalSignOut) => {
                if self.session.is_some() {
                    self.signed_out = self.session.clone();
                }
                self.clear(source)
            }
            (None, _) => self.clear(source),
        }
    }

    /// A sign-out event naming a session issued before the current one
    fn ends_older_session(&self, event: &SessionEvent) -> bool {
        match (&event.session, &self.session) {
            (Some(ended), Some(current)) => {
                ended.access_token != current.access_token && ended.issued_at < current.issued_at
            }
            _ => false,
        }
    }

    /// Whether the provider is reporting the locally signed-out session or an older one
    fn was_signed_out(&self, session: &Session) -> bool {
        self.signed_out.as_ref().is_some_and(|cleared| {
            cleared.access_token == session.access_token || session.issued_at <= cleared.issued_at
        })
    }

    fn establish(&mut self, session: Session, source: &'static str) -> Step {
        let mut step = Step::none();

        let previous = self.session.as_ref().map(|current| current.user_id.clone());
        if previous.as_deref() == Some(session.user_id.as_str()) {
            if self.session.as_ref() != Some(&session) {
                debug!(user_id = %session.user_id, source, "Session replaced for same identity");
                step.push(AuthTransition::SessionReplaced {
                    user_id: session.user_id.clone(),
                });
                self.session = Some(session);
            }
            return step;
        }

        let generation = self.next_generation();
        let user_id = session.user_id.clone();
        self.phase = Phase::Authenticated;
        self.session = Some(session);
        self.profile = None;
        self.load = LoadState {
            status: LoadStatus::Loading,
            generation,
        };

        match previous {
            Some(from) => {
                info!(from = %from, to = %user_id, generation, source, "Identity switched");
                step.push(AuthTransition::IdentitySwitched {
                    from,
                    to: user_id.clone(),
                    generation,
                });
            }
            None => {
                info!(user_id = %user_id, generation, source, "Session established");
                step.push(AuthTransition::SignedIn {
                    user_id: user_id.clone(),
                    generation,
                });
            }
        }

        step.push(AuthTransition::LoadStarted {
            user_id: user_id.clone(),
            generation,
        });
        step.load = Some(LoadRequest {
            user_id,
            generation,
        });
        step
    }

    fn clear(&mut self, source: &'static str) -> Step {
        let mut step = Step::none();
        if self.phase == Phase::Unauthenticated && self.session.is_none() {
            return step;
        }

        let user_id = self.session.take().map(|session| session.user_id);
        let generation = self.next_generation();
        self.phase = Phase::Unauthenticated;
        self.profile = None;
        self.load = LoadState::idle(generation);

        info!(user_id = ?user_id, generation, source, "Session cleared");
        step.push(AuthTransition::SignedOut {
            user_id,
            generation,
        });
        step
    }

    /// Apply a finished profile load if it still belongs to the current generation
    pub fn apply_load(&mut self, result: LoadResult) -> Step {
        let mut step = Step::none();

        let current_user = self.session.as_ref().map(|session| session.user_id.as_str());
        let is_current = !self.halted
            && result.generation == self.load.generation
            && self.load.status == LoadStatus::Loading
            && current_user == Some(result.user_id.as_str());

        if !is_current {
            debug!(
                user_id = %result.user_id,
                generation = result.generation,
                current_generation = self.load.generation,
                "Discarding stale profile load"
            );
            step.push(AuthTransition::StaleLoadDiscarded {
                user_id: result.user_id,
                generation: result.generation,
                current_generation: self.load.generation,
            });
            return step;
        }

        let generation = result.generation;
        let user_id = result.user_id;

        if result.outcome.is_degraded() {
            let keep_cached = self
                .profile
                .as_ref()
                .is_some_and(|cached| !cached.is_degraded() && cached.user_id == user_id);
            if !keep_cached {
                self.profile = Some(result.outcome.into_profile());
            }
            self.load.status = LoadStatus::Failed;

            warn!(user_id = %user_id, generation, kept_cached = keep_cached, "Profile load degraded");
            step.push(AuthTransition::ProfileDegraded {
                user_id,
                generation,
                kept_cached: keep_cached,
            });
            return step;
        }

        let profile = result.outcome.into_profile();
        let role = profile.role;
        self.profile = Some(profile);
        self.load.status = LoadStatus::Ready;

        info!(user_id = %user_id, generation, role = %role, "Profile ready");
        step.push(AuthTransition::ProfileReady {
            user_id,
            generation,
            role,
        });
        step
    }

    /// Start a new-generation reload for the current identity, keeping the cached profile
    pub fn refresh(&mut self) -> SessionResult<Step> {
        if self.halted {
            return Err(SessionError::ShutDown);
        }
        let user_id = match (&self.phase, &self.session) {
            (Phase::Authenticated, Some(session)) => session.user_id.clone(),
            _ => return Err(SessionError::NotAuthenticated),
        };

        let generation = self.next_generation();
        self.load = LoadState {
            status: LoadStatus::Loading,
            generation,
        };

        debug!(user_id = %user_id, generation, "Profile refresh requested");
        let mut step = Step::none();
        step.push(AuthTransition::LoadStarted {
            user_id: user_id.clone(),
            generation,
        });
        step.load = Some(LoadRequest {
            user_id,
            generation,
        });
        Ok(step)
    }

    /// Apply an edit to the cached profile ahead of the store
    ///
    /// Role changes are left for the store to confirm so that the gate never
    /// grants a role the store has not accepted.
    pub fn begin_edit(&mut self, patch: &ProfilePatch) -> SessionResult<(PendingEdit, Step)> {
        let user_id = self
            .session
            .as_ref()
            .map(|session| session.user_id.clone())
            .ok_or(SessionError::NotAuthenticated)?;
        let profile = self
            .profile
            .as_mut()
            .ok_or_else(|| SessionError::profile_unavailable("profile is still loading"))?;
        if profile.is_degraded() {
            return Err(SessionError::read_only(
                "profile store unreachable, edits are disabled",
            ));
        }

        let previous = profile.clone();
        let local_patch = ProfilePatch {
            role: None,
            ..patch.clone()
        };
        let mut step = Step::none();
        if profile.apply_patch(&local_patch) {
            step.push(AuthTransition::ProfileEdited {
                user_id: user_id.clone(),
            });
        }

        let pending = PendingEdit {
            user_id,
            generation: self.load.generation,
            previous,
            optimistic: profile.clone(),
        };
        Ok((pending, step))
    }

    /// Adopt the store's copy of an accepted edit
    pub fn commit_edit(&mut self, stored: Profile) -> Step {
        let mut step = Step::none();
        if !self.holds_profile_of(&stored.user_id) {
            return step;
        }

        step.push(AuthTransition::ProfileSaved {
            user_id: stored.user_id.clone(),
        });
        self.profile = Some(stored);
        step
    }

    /// Restore the profile cached before a rejected edit
    ///
    /// Nothing is restored once the optimistic copy has been replaced, or
    /// once a load started after the edit has finished.
    pub fn revert_edit(&mut self, pending: PendingEdit) -> Step {
        let mut step = Step::none();
        let superseded =
            self.load.generation != pending.generation && self.load.status.is_terminal();
        if superseded
            || !self.holds_profile_of(&pending.user_id)
            || self.profile.as_ref() != Some(&pending.optimistic)
        {
            debug!(user_id = %pending.user_id, "Newer profile cached, not reverting edit");
            return step;
        }

        step.push(AuthTransition::ProfileReverted {
            user_id: pending.user_id,
        });
        self.profile = Some(pending.previous);
        step
    }

    /// Stop accepting sessions and settle whatever is still loading
    ///
    /// Initialization resolves as unauthenticated. An abandoned load keeps a
    /// real cached profile as `Ready` and otherwise ends `Failed`.
    pub fn halt(&mut self) -> Step {
        let mut step = Step::none();
        if self.halted {
            return step;
        }
        self.halted = true;

        if self.phase.is_initial() {
            self.phase = Phase::Unauthenticated;
            self.load = LoadState::idle(self.next_generation());
        } else if self.load.status == LoadStatus::Loading {
            let keep = self.profile.as_ref().is_some_and(|profile| !profile.is_degraded());
            self.next_generation();
            self.load.status = if keep {
                LoadStatus::Ready
            } else {
                LoadStatus::Failed
            };
        }

        info!(phase = %self.phase, generation = self.load.generation, "Session machine halted");
        step.push(AuthTransition::ShutDown);
        step
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Check the structural invariants, describing the first violation found
    pub fn check_invariants(&self) -> Result<(), String> {
        match (&self.session, &self.profile) {
            (None, Some(profile)) => {
                return Err(format!(
                    "profile {} cached without a session",
                    profile.user_id
                ))
            }
            (Some(session), Some(profile)) if session.user_id != profile.user_id => {
                return Err(format!(
                    "profile for {} cached under session of {}",
                    profile.user_id, session.user_id
                ))
            }
            _ => {}
        }

        match self.phase {
            Phase::Authenticated if self.session.is_none() => {
                Err("authenticated without a session".to_string())
            }
            Phase::Unauthenticated if self.session.is_some() => {
                Err("unauthenticated with a session".to_string())
            }
            _ if self.phase != Phase::Authenticated && self.load.status != LoadStatus::Idle => {
                Err(format!("{:?} load outside an authenticated phase", self.load.status))
            }
            _ => Ok(()),
        }
    }

    fn holds_profile_of(&self, user_id: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.user_id == user_id)
            && self
                .profile
                .as_ref()
                .is_some_and(|profile| profile.user_id == user_id)
    }

    fn next_generation(&mut self) -> u64 {
        self.load.generation += 1;
        self.load.generation
    }
}
