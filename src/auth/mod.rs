//! Bearer token authorization for the player API.
//!
//! # Architecture
//!
//! ```text
//! Request arrives
//!   -> Extract `Authorization: Bearer <token>`
//!   -> TokenValidator: cache hit (re-check expiry) or full verification
//!        HS*  -> shared secret
//!        RS*  -> realm public key (KeyProvider, fetched once)
//!   -> Role check over every `resource_access.<resource>.roles`
//!   -> bool
//! ```
//!
//! [`Authorizer`] owns the whole chain and is shared with request handlers
//! by `Arc`. In [`SecurityMode::Open`] every check passes and usernames are
//! read from tokens without verification; that mode is meant for
//! environments where an upstream proxy already authenticated the caller.

pub mod cache;
pub mod claims;
pub mod keys;
pub mod validator;

use std::sync::Arc;

use axum::http::{HeaderMap, header};
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

pub use crate::config::SecurityMode;
use crate::config::SecurityConfig;

pub use cache::{ClaimCache, CacheStatsSnapshot, spawn_sweeper};
pub use claims::{Claims, RoleSet};
pub use keys::KeyProvider;
pub use validator::{AuthError, SigningFamily, TokenValidator};

/// Roles guarding the player API
pub mod roles {
    /// Read players and bots
    pub const PLAYER_VIEW: &str = "player.view";
    /// Create players, add and delete bots
    pub const PLAYER_EDIT: &str = "player.edit";
    /// Delete players
    pub const PLAYER_ADMIN: &str = "player.admin";
}

/// Decides whether a request may perform an operation
pub struct Authorizer {
    mode: SecurityMode,
    validator: TokenValidator,
}

impl Authorizer {
    /// Build the authorizer from configuration
    #[must_use]
    pub fn from_config(config: &SecurityConfig) -> Self {
        let keys = KeyProvider::new(config.realm_url.clone(), config.realm_timeout);
        let cache = Arc::new(ClaimCache::with_capacity_limit(config.cache.max_entries));
        let secret = config.resolve_shared_secret();
        let validator = TokenValidator::new(secret.as_deref().map(str::as_bytes), keys, cache);

        if config.mode == SecurityMode::Open {
            warn!("SECURITY MODE open - authorization checks are bypassed");
        }

        Self::new(config.mode, validator)
    }

    /// Build from an explicit validator
    #[must_use]
    pub fn new(mode: SecurityMode, validator: TokenValidator) -> Self {
        Self { mode, validator }
    }

    /// Active security mode
    #[must_use]
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Token validator (and through it the cache and key provider)
    #[must_use]
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// True iff the request may act with `required_role`.
    pub async fn authorize(&self, headers: &HeaderMap, required_role: &str) -> bool {
        if self.mode == SecurityMode::Open {
            return true;
        }

        match self.verified_claims(headers).await {
            Ok(claims) => {
                let allowed = claims.has_resource_role(required_role);
                debug!(
                    user = %claims.preferred_username,
                    role = %required_role,
                    allowed,
                    "Role check"
                );
                allowed
            }
            Err(e) => {
                debug!(role = %required_role, error = %e, "Authorization denied");
                false
            }
        }
    }

    /// Username of the caller, or an empty string when unknown.
    pub async fn username(&self, headers: &HeaderMap) -> String {
        if self.mode == SecurityMode::Open {
            return bearer_token(headers)
                .ok()
                .and_then(unverified_username)
                .unwrap_or_default();
        }

        match self.verified_claims(headers).await {
            Ok(claims) => claims.preferred_username.clone(),
            Err(e) => {
                debug!(error = %e, "Cannot resolve username");
                String::new()
            }
        }
    }

    async fn verified_claims(&self, headers: &HeaderMap) -> Result<Arc<Claims>, AuthError> {
        let token = bearer_token(headers)?;
        self.validator.validate(token).await
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

#[derive(Deserialize)]
struct UsernameOnly {
    preferred_username: Option<String>,
}

/// Read `preferred_username` from a JWT payload without verifying anything.
fn unverified_username(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<UsernameOnly>(&bytes)
        .ok()?
        .preferred_username
}
