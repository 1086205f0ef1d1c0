//! Core data type definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Profile id carried by profiles synthesized locally when the store is unreachable
pub const DEGRADED_PROFILE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Display name given to auto-provisioned profiles
pub const PLACEHOLDER_DISPLAY_NAME: &str = "New staff member";

/// Authorization role stored on a profile, ordered from least to most privileged
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular staff member (default for new profiles)
    #[default]
    Staff,
    /// Can manage locations and reports
    Manager,
    /// Full administrative access
    Admin,
}

impl Role {
    /// All roles, lowest privilege first
    pub const ALL: [Role; 3] = [Role::Staff, Role::Manager, Role::Admin];

    /// Lowest privilege role, assigned on provisioning
    pub fn lowest() -> Self {
        Role::Staff
    }

    /// Privilege rank, 0 for the lowest tier
    pub fn rank(&self) -> u8 {
        match self {
            Role::Staff => 0,
            Role::Manager => 1,
            Role::Admin => 2,
        }
    }

    /// Whether this role belongs to one of the elevated tiers
    pub fn is_elevated(&self) -> bool {
        self.rank() > Role::lowest().rank()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Staff => write!(f, "staff"),
            Role::Manager => write!(f, "manager"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "staff" => Ok(Role::Staff),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Proof of authentication issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Subject (user) id
    pub user_id: String,
    /// Email the subject signed in with
    pub email: Option<String>,
    /// Opaque access token
    pub access_token: String,
    /// Opaque refresh token
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session with fresh token material valid for `ttl`
    pub fn issue(user_id: impl Into<String>, email: Option<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            email,
            access_token: uuid::Uuid::new_v4().to_string(),
            refresh_token: uuid::Uuid::new_v4().to_string(),
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    /// Same subject with rotated token material
    pub fn refreshed(&self, ttl: Duration) -> Self {
        Self::issue(self.user_id.clone(), self.email.clone(), ttl)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Minimal subject info derived from this session
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.user_id.clone(),
            email: self.email.clone(),
        }
    }
}

/// Minimal subject information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

/// Authorization and display record for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile id (store generated, or the degraded sentinel)
    pub id: String,
    /// Subject id this profile belongs to
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Build a persisted-looking profile from insert fields
    pub fn from_new(id: impl Into<String>, fields: NewProfile) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: fields.user_id,
            display_name: fields.display_name,
            role: fields.role,
            phone: fields.phone,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unpersisted best-effort profile used when the store cannot be reached
    pub fn degraded(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DEGRADED_PROFILE_ID.to_string(),
            user_id: user_id.into(),
            display_name: PLACEHOLDER_DISPLAY_NAME.to_string(),
            role: Role::lowest(),
            phone: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this profile was synthesized locally rather than read from the store
    pub fn is_degraded(&self) -> bool {
        self.id == DEGRADED_PROFILE_ID
    }

    /// Apply a partial update, bumping `updated_at` when anything changed
    pub fn apply_patch(&mut self, patch: &ProfilePatch) -> bool {
        let mut changed = false;

        if let Some(display_name) = &patch.display_name {
            if &self.display_name != display_name {
                self.display_name = display_name.clone();
                changed = true;
            }
        }
        if let Some(phone) = &patch.phone {
            if &self.phone != phone {
                self.phone = phone.clone();
                changed = true;
            }
        }
        if let Some(role) = patch.role {
            if self.role != role {
                self.role = role;
                changed = true;
            }
        }

        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

/// Insert payload for a new profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub phone: Option<String>,
}

impl NewProfile {
    /// Default profile provisioned for a user seen for the first time
    pub fn provisioned(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            role: Role::lowest(),
            phone: None,
        }
    }
}

/// Partial profile update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    /// `Some(None)` clears the phone number
    pub phone: Option<Option<String>>,
    pub role: Option<Role>,
}

impl ProfilePatch {
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn phone(mut self, phone: Option<String>) -> Self {
        self.phone = Some(phone);
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.phone.is_none() && self.role.is_none()
    }
}

/// Kind of session change reported by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Initial,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl std::fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEventKind::Initial => write!(f, "initial"),
            SessionEventKind::SignedIn => write!(f, "signed_in"),
            SessionEventKind::SignedOut => write!(f, "signed_out"),
            SessionEventKind::TokenRefreshed => write!(f, "token_refreshed"),
            SessionEventKind::UserUpdated => write!(f, "user_updated"),
        }
    }
}

/// Session change notification from the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: Option<Session>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering_and_parsing() {
        assert!(Role::Admin > Role::Manager);
        assert!(Role::Manager > Role::Staff);
        assert_eq!(Role::default(), Role::Staff);
        assert!(!Role::Staff.is_elevated());
        assert!(Role::Manager.is_elevated());

        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" staff ".parse::<Role>().unwrap(), Role::Staff);
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(Role::Manager.to_string(), "manager");
    }

    #[test]
    fn test_degraded_profile_is_marked() {
        let profile = Profile::degraded("user-1");
        assert!(profile.is_degraded());
        assert_eq!(profile.role, Role::Staff);
        assert_eq!(profile.user_id, "user-1");

        let real = Profile::from_new("p-1", NewProfile::provisioned("user-1", "Sam"));
        assert!(!real.is_degraded());
    }

    #[test]
    fn test_apply_patch() {
        let mut profile = Profile::from_new("p-1", NewProfile::provisioned("user-1", "Sam"));

        assert!(!profile.apply_patch(&ProfilePatch::default()));
        assert!(profile.apply_patch(
            &ProfilePatch::default()
                .display_name("Sam Porter")
                .phone(Some("555-0100".to_string()))
        ));
        assert_eq!(profile.display_name, "Sam Porter");
        assert_eq!(profile.phone.as_deref(), Some("555-0100"));

        assert!(profile.apply_patch(&ProfilePatch::default().phone(None)));
        assert!(profile.phone.is_none());
    }

    #[test]
    fn test_session_identity_and_refresh() {
        let session = Session::issue("user-1", Some("a@b.org".to_string()), Duration::hours(1));
        let refreshed = session.refreshed(Duration::hours(1));

        assert_eq!(session.identity(), refreshed.identity());
        assert_ne!(session.access_token, refreshed.access_token);
        assert!(!session.is_expired());
    }
}
