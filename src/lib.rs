//! Player manager library
//!
//! Players register, upload bots, and manage them through an HTTP API
//! guarded by bearer tokens from an external identity realm.
//!
//! # Features
//!
//! - **Token verification**: HMAC tokens against a shared secret, RSA tokens
//!   against the realm public key (fetched once, on first use)
//! - **Claim cache**: verified claims keyed by raw token, re-checked against
//!   the clock on every hit and swept in the background
//! - **Role checks**: exact match over every resource-scoped role list
//! - **Open mode**: bypass for deployments behind an authenticating proxy
//! - **Player store**: in-memory with optional JSON file persistence, or
//!   SQLite/PostgreSQL through `sea-orm`
//! - **Request metrics**: per-route counters and latencies, exported for
//!   Prometheus with the `metrics` feature

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| Error::Internal(format!("Failed to install tracing: {e}")))?;
        }
        _ => {
            subscriber
                .with(fmt::layer())
                .try_init()
                .map_err(|e| Error::Internal(format!("Failed to install tracing: {e}")))?;
        }
    }

    Ok(())
}
