//! Player store: persistence for players and their bots.
//!
//! The [`PlayerStore`] trait abstracts over storage backends:
//!
//! - [`JsonStore`]: everything in memory, optionally snapshotted to a JSON
//!   file after every mutation
//! - [`SqlStore`]: a relational database (SQLite or PostgreSQL) where bots
//!   reference their owner with a cascading foreign key
//!
//! [`open_store`] picks the backend named by `store.backend`.

mod entity;
mod json;
mod sql;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::model::{Bot, BotCode, BotSummary, BotWithPlayer, NewBot, Player};
use crate::{Error, Result};

pub use json::JsonStore;
pub use sql::SqlStore;

/// Storage backend for players and bots.
///
/// Implementations must be `Send + Sync` because the store is shared
/// across request handlers.
#[async_trait]
pub trait PlayerStore: Send + Sync + 'static {
    /// All players, without bots
    async fn players(&self) -> Result<Vec<Player>>;

    /// All players with their bots
    async fn players_with_bots(&self) -> Result<Vec<Player>>;

    /// One player with bots
    async fn player(&self, id: i64) -> Result<Player>;

    /// Look a player up by name (surrounding blanks ignored)
    async fn player_by_name(&self, name: &str) -> Result<Option<Player>>;

    /// Look a player up by name, registering it if unknown.
    async fn player_by_name_or_create(&self, name: &str) -> Result<Player> {
        if let Some(player) = self.player_by_name(name).await? {
            return Ok(player);
        }
        match self.add_player(name).await {
            // Lost a race with a concurrent registration
            Err(Error::Conflict(_)) => self
                .player_by_name(name)
                .await?
                .ok_or_else(|| Error::Internal(format!("player {name} vanished"))),
            other => other,
        }
    }

    /// Register a new player
    async fn add_player(&self, name: &str) -> Result<Player>;

    /// Delete a player and every bot it owns
    async fn delete_player(&self, id: i64) -> Result<Player>;

    /// Bots owned by a player
    async fn player_bots(&self, player_id: i64) -> Result<Vec<Bot>>;

    /// Add a bot to a player
    async fn add_bot(&self, player_id: i64, bot: NewBot) -> Result<BotSummary>;

    /// A player's bot with the owner's name
    async fn bot(&self, player_id: i64, bot_id: i64) -> Result<BotWithPlayer>;

    /// A player's bot with its source code
    async fn bot_code(&self, player_id: i64, bot_id: i64) -> Result<BotCode>;

    /// Delete a bot
    async fn delete_bot(&self, bot_id: i64) -> Result<BotSummary>;

    /// Delete a bot only if `player_id` owns it; check and removal are atomic
    async fn delete_player_bot(&self, player_id: i64, bot_id: i64) -> Result<BotSummary>;
}

/// Open the backend selected by `config.backend`
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn PlayerStore>> {
    match config.backend {
        StoreBackend::Json => Ok(Arc::new(JsonStore::from_path(config.path.as_deref())?)),
        StoreBackend::Sqlite | StoreBackend::Postgres => {
            Ok(Arc::new(SqlStore::connect(config).await?))
        }
    }
}

/// Canonical form of a player name, shared by registration and lookup.
fn normalize_name(name: &str) -> &str {
    name.trim()
}

/// Canonical player name for registration; empty names are refused.
fn new_player_name(name: &str) -> Result<&str> {
    let name = normalize_name(name);
    if name.is_empty() {
        return Err(Error::InvalidInput("player name must not be empty".to_string()));
    }
    Ok(name)
}

/// Validate an uploaded bot and reduce its file name to the base name.
fn checked_bot(bot: NewBot) -> Result<NewBot> {
    let name = bot.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("bot name must not be empty".to_string()));
    }
    if bot.botcode.is_empty() {
        return Err(Error::InvalidInput("bot code must not be empty".to_string()));
    }
    Ok(NewBot {
        name: name.to_string(),
        filename: base_name(&bot.filename),
        botcode: bot.botcode,
    })
}

/// Strip directories from an uploaded file name.
fn base_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}
