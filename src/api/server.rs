//! Player manager server

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::auth::{Authorizer, SecurityMode, spawn_sweeper};
use crate::config::Config;
use crate::store::PlayerStore;
use crate::{Error, Result};

/// HTTP server for the player API
pub struct PlayerServer {
    /// Configuration
    config: Config,
    /// Router state
    state: Arc<AppState>,
}

impl PlayerServer {
    /// Create a server around an existing store and authorizer
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn PlayerStore>, authorizer: Arc<Authorizer>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { store, authorizer }),
        }
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` completes.
    ///
    /// Open connections get `server.shutdown_timeout` to finish after the
    /// signal; the claim sweeper stops with the server.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let authorizer = &self.state.authorizer;
        let sweeper = spawn_sweeper(
            Arc::clone(authorizer.validator().cache()),
            self.config.security.cache.sweep_interval,
            shutdown_tx.subscribe(),
        );

        let local = listener.local_addr()?;
        info!("============================================================");
        info!("PLAYER MANAGER v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(addr = %local, "Listening");
        match authorizer.mode() {
            SecurityMode::Secured => info!(
                realm_url = ?self.config.security.realm_url,
                shared_secret = self.config.security.shared_secret.is_some(),
                "AUTHORIZATION secured"
            ),
            SecurityMode::Open => warn!("AUTHORIZATION open - every request is allowed"),
        }
        info!("============================================================");

        let app = create_router(Arc::clone(&self.state));

        let notify_tx = shutdown_tx.clone();
        let graceful = async move {
            signal.await;
            info!("Shutdown signal received");
            let _ = notify_tx.send(());
        };

        let mut drain_rx = shutdown_tx.subscribe();
        let drain_timeout = self.config.server.shutdown_timeout;
        let drain_deadline = async move {
            let _ = drain_rx.recv().await;
            tokio::time::sleep(drain_timeout).await;
        };

        tokio::select! {
            result = axum::serve(listener, app).with_graceful_shutdown(graceful).into_future() => {
                result.map_err(|e| Error::Internal(e.to_string()))?;
            }
            () = drain_deadline => {
                warn!(timeout = ?drain_timeout, "Shutdown timeout elapsed, dropping open connections");
            }
        }

        let _ = shutdown_tx.send(());
        let _ = sweeper.await;

        let stats = self.state.authorizer.validator().cache().stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            "Server stopped"
        );
        Ok(())
    }
}

/// Resolve on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
