//! Authorization Gate
//!
//! Pure role predicates over the currently cached profile.

use super::features::{Feature, FEATURE_TABLE};
use serde::Serialize;
use stockroom_core::{Profile, Role};

/// Authorization decisions derived from a single profile
///
/// Built fresh from each profile replacement; holds no other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthorizationGate {
    /// Role of a real profile; `None` when absent or degraded
    role: Option<Role>,
    degraded: bool,
}

impl AuthorizationGate {
    /// Derive the gate for the given profile
    pub fn new(profile: Option<&Profile>) -> Self {
        match profile {
            Some(profile) if profile.is_degraded() => Self {
                role: None,
                degraded: true,
            },
            Some(profile) => Self {
                role: Some(profile.role),
                degraded: false,
            },
            None => Self::deny_all(),
        }
    }

    /// Gate for an absent profile
    pub fn deny_all() -> Self {
        Self {
            role: None,
            degraded: false,
        }
    }

    /// Effective role, if any
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether decisions are based on a locally synthesized profile
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether the user holds one of the elevated roles
    pub fn is_privileged(&self) -> bool {
        self.role.is_some_and(|role| role.is_elevated())
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.role.is_some_and(|role| roles.contains(&role))
    }

    /// Whether the feature should be shown and usable
    pub fn can_use(&self, feature: Feature) -> bool {
        let Some(rule) = feature.rule() else {
            return false;
        };

        if self.degraded {
            return rule.available_when_degraded;
        }
        self.has_any_role(rule.roles)
    }

    /// Features visible to this user, in table order
    pub fn visible_features(&self) -> Vec<Feature> {
        FEATURE_TABLE
            .iter()
            .map(|rule| rule.feature)
            .filter(|feature| self.can_use(*feature))
            .collect()
    }
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::deny_all()
    }
}
