//! HTTP API for players and bots

pub mod metrics;
mod router;
mod server;

pub use router::{AppState, create_router};
pub use server::{PlayerServer, shutdown_signal};
