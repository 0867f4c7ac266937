//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Token verification and authorization
    pub security: SecurityConfig,
    /// Player/bot store
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (PLAYERMGR_ prefix, `__` nests).
        // Flat CLI variables share the prefix and are not config keys.
        figment = figment.merge(
            Env::prefixed("PLAYERMGR_")
                .ignore(&[
                    "config",
                    "store",
                    "store_backend",
                    "store_url",
                    "log_level",
                    "log_format",
                ])
                .split("__"),
        );

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if let Some(ref realm) = self.security.realm_url {
            url::Url::parse(realm)
                .map_err(|e| Error::Config(format!("Invalid realm_url {realm:?}: {e}")))?;
        }

        if self.security.cache.sweep_interval.is_zero() {
            return Err(Error::Config(
                "security.cache.sweep_interval must be greater than zero".to_string(),
            ));
        }

        match self.store.backend {
            StoreBackend::Json if self.store.url.is_some() => {
                return Err(Error::Config(
                    "store.url needs the sqlite or postgres backend".to_string(),
                ));
            }
            StoreBackend::Postgres => {
                let url = self.store.postgres_url()?;
                url::Url::parse(&url)
                    .map_err(|e| Error::Config(format!("Invalid store.url: {e}")))?;
            }
            _ => {}
        }

        if self.security.mode == SecurityMode::Secured
            && self.security.realm_url.is_none()
            && self.security.shared_secret.is_none()
        {
            return Err(Error::Config(
                "secured mode needs security.realm_url or security.shared_secret".to_string(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Whether bearer tokens are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Every check allows; usernames are read from unverified tokens
    Open,
    /// Tokens are verified and roles enforced
    #[default]
    Secured,
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Secured => f.write_str("secured"),
        }
    }
}

impl std::str::FromStr for SecurityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "secured" => Ok(Self::Secured),
            other => Err(Error::Config(format!(
                "Unknown security mode {other:?} (expected open or secured)"
            ))),
        }
    }
}

/// Token verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enforcement mode
    pub mode: SecurityMode,
    /// Realm info endpoint serving the RSA `public_key`
    /// (e.g. `http://localhost/auth/realms/amazebot`)
    pub realm_url: Option<String>,
    /// Shared secret for HMAC-signed tokens.
    /// Supports: literal value or `env:VAR_NAME`
    pub shared_secret: Option<String>,
    /// Timeout for the realm key fetch
    #[serde(with = "humantime_serde")]
    pub realm_timeout: Duration,
    /// Claim cache tuning
    pub cache: ClaimCacheConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: SecurityMode::Secured,
            realm_url: None,
            shared_secret: None,
            realm_timeout: Duration::from_secs(10),
            cache: ClaimCacheConfig::default(),
        }
    }
}

impl SecurityConfig {
    /// Resolve the shared secret (expand `env:VAR_NAME`).
    ///
    /// An unset variable yields `None`, which disables HMAC tokens.
    #[must_use]
    pub fn resolve_shared_secret(&self) -> Option<String> {
        resolve_secret(self.shared_secret.as_deref()?)
    }
}

/// Expand a literal-or-`env:VAR_NAME` secret; `None` when the variable is unset.
fn resolve_secret(value: &str) -> Option<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => match env::var(var_name) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = %var_name, "Secret variable not set");
                None
            }
        },
        None => Some(value.to_string()),
    }
}

/// Claim cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimCacheConfig {
    /// Maximum cached tokens (0 = unbounded)
    pub max_entries: usize,
    /// How often expired claims are swept out
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ClaimCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 0,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Where players and bots are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In memory, optionally snapshotted to a JSON file
    #[default]
    Json,
    /// SQLite database file, or an in-memory database
    Sqlite,
    /// PostgreSQL server
    Postgres,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Sqlite => f.write_str("sqlite"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "pgsql" => Ok(Self::Postgres),
            other => Err(Error::Config(format!(
                "Unknown store backend {other:?} (expected json, sqlite or postgres)"
            ))),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Storage backend
    pub backend: StoreBackend,
    /// JSON snapshot or SQLite database file (memory only when unset)
    pub path: Option<PathBuf>,
    /// Full database URL; takes precedence over the fields below
    pub url: Option<String>,
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// PostgreSQL database name
    pub dbname: String,
    /// PostgreSQL user
    pub user: Option<String>,
    /// PostgreSQL password.
    /// Supports: literal value or `env:VAR_NAME`
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            path: None,
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            dbname: "playerdb".to_string(),
            user: None,
            password: None,
        }
    }
}

impl StoreConfig {
    /// Connection URL for the PostgreSQL backend.
    ///
    /// Uses `url` verbatim when set, otherwise assembles one from the
    /// host, port, database and credentials.
    pub fn postgres_url(&self) -> Result<String> {
        if let Some(ref url) = self.url {
            return Ok(url.clone());
        }

        let mut url = url::Url::parse(&format!("postgres://{}", self.host))
            .map_err(|e| Error::Config(format!("Invalid store.host {:?}: {e}", self.host)))?;
        let invalid = |field: &str| Error::Config(format!("store.{field} cannot be used in a URL"));
        url.set_port(Some(self.port)).map_err(|()| invalid("port"))?;
        if let Some(ref user) = self.user {
            url.set_username(user).map_err(|()| invalid("user"))?;
        }
        if let Some(password) = self.password.as_deref().and_then(resolve_secret) {
            url.set_password(Some(&password)).map_err(|()| invalid("password"))?;
        }
        url.set_path(&self.dbname);
        Ok(url.into())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom(format!("{mins}m is out of range")))
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
