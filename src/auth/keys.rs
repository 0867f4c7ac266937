//! Realm public key provider.
//!
//! The realm info endpoint (`GET <realm_url>`) answers with a JSON document
//! whose `public_key` field is the bare base64 body of the realm's RSA
//! signing key:
//!
//! ```json
//! {"realm": "amazebot", "public_key": "MIIBI...", "tokens-not-before": 1619555853}
//! ```
//!
//! The key is fetched on first use and kept for the provider's lifetime.
//! Concurrent first fetches are serialized; a failed fetch leaves nothing
//! cached so the next caller tries again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::AuthError;

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";
const PEM_LINE_WIDTH: usize = 64;

/// Realm info document
#[derive(Debug, Deserialize)]
struct RealmInfo {
    #[serde(default)]
    realm: Option<String>,
    public_key: String,
}

/// Lazily fetched, process-lifetime RSA verification key
pub struct KeyProvider {
    realm_url: Option<String>,
    http: reqwest::Client,
    key: OnceCell<Arc<DecodingKey>>,
    fetches: AtomicU64,
}

impl KeyProvider {
    /// Create a provider for `realm_url` (`None` disables RSA verification)
    #[must_use]
    pub fn new(realm_url: Option<String>, timeout: Duration) -> Self {
        Self {
            realm_url,
            http: http_client(timeout),
            key: OnceCell::new(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Return the cached key or fetch it from the realm.
    pub async fn signing_key(&self) -> Result<Arc<DecodingKey>, AuthError> {
        self.key
            .get_or_try_init(|| self.fetch())
            .await
            .map(Arc::clone)
    }

    /// True once a key has been fetched successfully
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.key.initialized()
    }

    /// Number of network fetches attempted so far
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    async fn fetch(&self) -> Result<Arc<DecodingKey>, AuthError> {
        let url = self
            .realm_url
            .as_deref()
            .ok_or_else(|| AuthError::KeyUnavailable("no realm URL configured".to_string()))?;

        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(realm_url = %url, "Fetching realm public key");

        let response = self.http.get(url).send().await.map_err(|e| {
            warn!(realm_url = %url, error = %e, "Realm key fetch failed");
            AuthError::KeyUnavailable(e.to_string())
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(realm_url = %url, status = %status, "Realm key fetch rejected");
            return Err(AuthError::KeyUnavailable(format!("realm answered {status}")));
        }

        let info: RealmInfo = response
            .json()
            .await
            .map_err(|e| AuthError::KeyUnavailable(format!("invalid realm info: {e}")))?;

        let key = DecodingKey::from_rsa_pem(wrap_public_key(&info.public_key).as_bytes())
            .map_err(|e| AuthError::KeyUnavailable(format!("invalid realm public key: {e}")))?;

        debug!(realm = ?info.realm, "Realm public key cached");
        Ok(Arc::new(key))
    }
}

/// HTTP client for realm fetches, bounded by `timeout`.
fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(
                error = %e,
                timeout = ?timeout,
                "Cannot build realm HTTP client, realm fetches run without a timeout"
            );
            reqwest::Client::new()
        })
}

/// Wrap a bare base64 key body in PEM public-key markers.
fn wrap_public_key(body: &str) -> String {
    let compact: String = body.split_whitespace().collect();
    let mut pem = String::with_capacity(compact.len() + 80);
    pem.push_str(PEM_HEADER);
    pem.push('\n');
    for line in compact.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 is ASCII, so byte chunks are valid UTF-8
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(PEM_FOOTER);
    pem.push('\n');
    pem
}
