//! Realm token claims and their time-bound checks.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::AuthError;

/// A set of role names, as carried under `realm_access` and each
/// `resource_access.<resource>` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet {
    /// Role names
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl RoleSet {
    /// Build a role set from names
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact-match membership
    #[must_use]
    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Verified payload of a bearer token.
///
/// Timestamps are seconds since the Unix epoch. `exp` is mandatory; `iat` and
/// `nbf` are checked only when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject's login name
    #[serde(default)]
    pub preferred_username: String,
    /// Realm-wide roles (not consulted by role checks)
    #[serde(default)]
    pub realm_access: RoleSet,
    /// Roles per resource/application
    #[serde(default)]
    pub resource_access: HashMap<String, RoleSet>,
    /// Expires at
    pub exp: u64,
    /// Issued at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Not before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
}

impl Claims {
    /// Check `nbf <= now < exp` (and `iat <= now`) with no leeway.
    pub fn check_validity(&self, now: u64) -> Result<(), AuthError> {
        if now >= self.exp {
            return Err(AuthError::Expired { exp: self.exp, now });
        }
        if let Some(nbf) = self.nbf.filter(|nbf| now < *nbf) {
            return Err(AuthError::NotYetValid { at: nbf, now });
        }
        if let Some(iat) = self.iat.filter(|iat| now < *iat) {
            return Err(AuthError::NotYetValid { at: iat, now });
        }
        Ok(())
    }

    /// True when `role` appears in any resource's role set.
    #[must_use]
    pub fn has_resource_role(&self, role: &str) -> bool {
        self.resource_access.values().any(|set| set.contains(role))
    }
}

/// Current time in seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
