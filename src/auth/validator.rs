//! Bearer token verification.
//!
//! # Verification flow
//!
//! 1. Cached claims for the exact token string are re-checked against the
//!    clock and returned if still valid; stale entries are evicted.
//! 2. The JWT header (unverified) names the signing algorithm.
//! 3. HMAC tokens are verified with the shared secret, RSA tokens with the
//!    realm public key from [`KeyProvider`]. Other algorithms are refused.
//! 4. The decoded claims pass the same time check as cache hits, then are
//!    cached under the raw token.

use std::collections::HashSet;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use tracing::{debug, warn};

use super::cache::ClaimCache;
use super::claims::{Claims, unix_now};
use super::keys::KeyProvider;

/// Reasons a token is refused.
///
/// These never reach the HTTP caller; they only appear in diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer <token>` header.
    #[error("missing bearer token")]
    MissingToken,

    /// Token is not a well-formed JWT, or its payload does not decode.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Header names an algorithm outside the HMAC and RSA families.
    #[error("unexpected signing method: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature does not verify against the selected key.
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// `exp` has passed.
    #[error("token expired (exp {exp}, now {now})")]
    Expired {
        /// Expiry timestamp
        exp: u64,
        /// Time of the check
        now: u64,
    },

    /// `nbf` or `iat` lies in the future.
    #[error("token not valid yet (valid from {at}, now {now})")]
    NotYetValid {
        /// First valid second
        at: u64,
        /// Time of the check
        now: u64,
    },

    /// Verification key for the token's family could not be obtained.
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Self::SignatureInvalid,
            ErrorKind::InvalidAlgorithm => Self::UnsupportedAlgorithm(err.to_string()),
            _ => Self::MalformedToken(err.to_string()),
        }
    }
}

/// Key family a token algorithm belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningFamily {
    /// `HS256`, `HS384`, `HS512`
    Hmac,
    /// `RS256`, `RS384`, `RS512`
    Rsa,
}

impl SigningFamily {
    /// Classify a header algorithm; `None` for unsupported families
    #[must_use]
    pub fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Some(Self::Hmac),
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => Some(Self::Rsa),
            _ => None,
        }
    }
}

/// Verifies bearer tokens and caches their claims
pub struct TokenValidator {
    shared_secret: Option<DecodingKey>,
    keys: KeyProvider,
    cache: Arc<ClaimCache>,
}

impl TokenValidator {
    /// Create a validator.
    ///
    /// `shared_secret` enables HMAC tokens; `keys` serves RSA tokens.
    #[must_use]
    pub fn new(shared_secret: Option<&[u8]>, keys: KeyProvider, cache: Arc<ClaimCache>) -> Self {
        Self {
            shared_secret: shared_secret.map(DecodingKey::from_secret),
            keys,
            cache,
        }
    }

    /// Claim cache shared with this validator
    #[must_use]
    pub fn cache(&self) -> &Arc<ClaimCache> {
        &self.cache
    }

    /// Realm key provider
    #[must_use]
    pub fn keys(&self) -> &KeyProvider {
        &self.keys
    }

    /// Verify `token` and return its claims.
    pub async fn validate(&self, token: &str) -> Result<Arc<Claims>, AuthError> {
        if let Some(claims) = self.cache.get(token) {
            match claims.check_validity(unix_now()) {
                Ok(()) => return Ok(claims),
                Err(e) => {
                    debug!(error = %e, "Cached claims no longer valid, evicting");
                    self.cache.evict(token);
                }
            }
        }

        let claims = Arc::new(self.verify(token).await?);
        self.cache.insert(token, Arc::clone(&claims));
        debug!(user = %claims.preferred_username, "Token verified");
        Ok(claims)
    }

    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::MalformedToken(e.to_string()))?;

        let family = SigningFamily::of(header.alg)
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)))?;

        let claims = match family {
            SigningFamily::Hmac => {
                let key = self.shared_secret.as_ref().ok_or_else(|| {
                    AuthError::KeyUnavailable("no shared secret configured".to_string())
                })?;
                decode_claims(token, key, header.alg)?
            }
            SigningFamily::Rsa => {
                let key = self.keys.signing_key().await?;
                decode_claims(token, &key, header.alg)?
            }
        };

        claims.check_validity(unix_now())?;
        Ok(claims)
    }
}

/// Verify the signature with `key` and decode the payload.
fn decode_claims(token: &str, key: &DecodingKey, alg: Algorithm) -> Result<Claims, AuthError> {
    jsonwebtoken::decode::<Claims>(token, key, &build_validation(alg))
        .map(|data| data.claims)
        .map_err(|e| {
            let err = AuthError::from(e);
            warn!(error = %err, "Token rejected");
            err
        })
}

/// Build a [`Validation`] pinned to a single algorithm.
///
/// Time bounds are left to [`Claims::check_validity`] so cached and fresh
/// tokens go through the same leeway-free check; only `exp` presence is
/// enforced here.
fn build_validation(alg: Algorithm) -> Validation {
    let mut v = Validation::new(alg);
    v.leeway = 0;
    v.validate_exp = false;
    v.validate_nbf = false;
    // Realm tokens list several audiences; roles decide access, not `aud`
    v.validate_aud = false;
    v.required_spec_claims = HashSet::from(["exp".to_string()]);
    v
}
