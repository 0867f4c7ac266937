//! In-memory store with optional JSON file persistence.
//!
//! Reads take a shared `parking_lot` lock and never touch the disk.
//! Mutations are serialized by an async mutex and applied to a copy of the
//! state; the copy replaces the live state only once its snapshot is on
//! disk, so a failed write leaves nothing behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{PlayerStore, checked_bot, new_player_name, normalize_name};
use crate::model::{Bot, BotCode, BotSummary, BotWithPlayer, NewBot, Player};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayerRecord {
    id: i64,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BotRecord {
    id: i64,
    player_id: i64,
    name: String,
    #[serde(default)]
    filename: String,
    botcode: String,
}

impl BotRecord {
    fn view(&self) -> Bot {
        Bot {
            id: self.id,
            name: self.name.clone(),
            filename: self.filename.clone(),
        }
    }

    fn summary(&self) -> BotSummary {
        BotSummary {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Everything the store holds; also the on-disk snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    next_player_id: i64,
    next_bot_id: i64,
    players: BTreeMap<i64, PlayerRecord>,
    bots: BTreeMap<i64, BotRecord>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            next_player_id: 1,
            next_bot_id: 1,
            players: BTreeMap::new(),
            bots: BTreeMap::new(),
        }
    }
}

impl StoreState {
    fn bots_of(&self, player_id: i64) -> Vec<Bot> {
        self.bots
            .values()
            .filter(|b| b.player_id == player_id)
            .map(BotRecord::view)
            .collect()
    }

    fn with_bots(&self, record: &PlayerRecord) -> Player {
        Player {
            bots: self.bots_of(record.id),
            ..Player::new(record.id, record.name.clone())
        }
    }

    fn owned_bot(&self, player_id: i64, bot_id: i64) -> Result<(&PlayerRecord, &BotRecord)> {
        let player = self
            .players
            .get(&player_id)
            .ok_or_else(|| Error::player_not_found(player_id))?;
        let bot = self
            .bots
            .get(&bot_id)
            .filter(|b| b.player_id == player_id)
            .ok_or_else(|| Error::bot_not_found(bot_id))?;
        Ok((player, bot))
    }
}

/// In-memory store with optional JSON file persistence
pub struct JsonStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
    persist: tokio::sync::Mutex<()>,
}

impl JsonStore {
    /// Create an empty store that lives only in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            path: None,
            persist: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a store backed by `path`, loading the file if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let state: StoreState = serde_json::from_str(&content)?;
            info!(
                path = %path.display(),
                players = state.players.len(),
                bots = state.bots.len(),
                "Loaded player store"
            );
            state
        } else {
            debug!(path = %path.display(), "No store file yet, starting empty");
            StoreState::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            persist: tokio::sync::Mutex::new(()),
        })
    }

    /// Open `path` when given, otherwise an in-memory store
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::in_memory()), Self::open)
    }

    /// Backing file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `mutate` to a copy of the state, persist it, then publish it.
    async fn mutate<T>(&self, mutate: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let _guard = self.persist.lock().await;

        // Only mutations change the state and they hold `persist`
        let mut next = self.state.read().clone();
        let value = mutate(&mut next)?;

        if let Some(ref path) = self.path {
            let bytes = serde_json::to_vec_pretty(&next)?;
            if let Err(e) = write_snapshot(path, &bytes).await {
                warn!(path = %path.display(), error = %e, "Store snapshot failed, change discarded");
                return Err(e);
            }
        }

        *self.state.write() = next;
        Ok(value)
    }
}

impl Default for JsonStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Replace the snapshot file via a temporary sibling and rename.
async fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "Store snapshot written");
    Ok(())
}

#[async_trait]
impl PlayerStore for JsonStore {
    async fn players(&self) -> Result<Vec<Player>> {
        let state = self.state.read();
        Ok(state
            .players
            .values()
            .map(|p| Player::new(p.id, p.name.clone()))
            .collect())
    }

    async fn players_with_bots(&self) -> Result<Vec<Player>> {
        let state = self.state.read();
        Ok(state.players.values().map(|p| state.with_bots(p)).collect())
    }

    async fn player(&self, id: i64) -> Result<Player> {
        let state = self.state.read();
        state
            .players
            .get(&id)
            .map(|p| state.with_bots(p))
            .ok_or_else(|| Error::player_not_found(id))
    }

    async fn player_by_name(&self, name: &str) -> Result<Option<Player>> {
        let name = normalize_name(name);
        let state = self.state.read();
        Ok(state
            .players
            .values()
            .find(|p| p.name == name)
            .map(|p| state.with_bots(p)))
    }

    async fn add_player(&self, name: &str) -> Result<Player> {
        let name = new_player_name(name)?;

        let player = self
            .mutate(|state| {
                if state.players.values().any(|p| p.name == name) {
                    return Err(Error::Conflict(format!("player {name} already exists")));
                }
                let id = state.next_player_id;
                state.next_player_id += 1;
                state.players.insert(
                    id,
                    PlayerRecord {
                        id,
                        name: name.to_string(),
                    },
                );
                Ok(Player::new(id, name))
            })
            .await?;

        info!(player_id = player.id, name = %player.name, "Player added");
        Ok(player)
    }

    async fn delete_player(&self, id: i64) -> Result<Player> {
        let player = self
            .mutate(|state| {
                let record = state
                    .players
                    .remove(&id)
                    .ok_or_else(|| Error::player_not_found(id))?;
                let bots = state.bots_of(id);
                state.bots.retain(|_, b| b.player_id != id);
                Ok(Player {
                    bots,
                    ..Player::new(record.id, record.name)
                })
            })
            .await?;

        info!(player_id = id, bots = player.bots.len(), "Player deleted");
        Ok(player)
    }

    async fn player_bots(&self, player_id: i64) -> Result<Vec<Bot>> {
        let state = self.state.read();
        if !state.players.contains_key(&player_id) {
            return Err(Error::player_not_found(player_id));
        }
        Ok(state.bots_of(player_id))
    }

    async fn add_bot(&self, player_id: i64, bot: NewBot) -> Result<BotSummary> {
        let bot = checked_bot(bot)?;

        let summary = self
            .mutate(|state| {
                if !state.players.contains_key(&player_id) {
                    return Err(Error::player_not_found(player_id));
                }
                let id = state.next_bot_id;
                state.next_bot_id += 1;
                let record = BotRecord {
                    id,
                    player_id,
                    name: bot.name,
                    filename: bot.filename,
                    botcode: bot.botcode,
                };
                let summary = record.summary();
                state.bots.insert(id, record);
                Ok(summary)
            })
            .await?;

        info!(player_id, bot_id = summary.id, name = %summary.name, "Bot added");
        Ok(summary)
    }

    async fn bot(&self, player_id: i64, bot_id: i64) -> Result<BotWithPlayer> {
        let state = self.state.read();
        let (player, bot) = state.owned_bot(player_id, bot_id)?;
        Ok(BotWithPlayer {
            id: bot.id,
            name: bot.name.clone(),
            filename: bot.filename.clone(),
            player_name: player.name.clone(),
        })
    }

    async fn bot_code(&self, player_id: i64, bot_id: i64) -> Result<BotCode> {
        let state = self.state.read();
        let (_, bot) = state.owned_bot(player_id, bot_id)?;
        Ok(BotCode {
            id: bot.id,
            name: bot.name.clone(),
            filename: bot.filename.clone(),
            botcode: bot.botcode.clone(),
        })
    }

    async fn delete_bot(&self, bot_id: i64) -> Result<BotSummary> {
        let summary = self
            .mutate(|state| {
                state
                    .bots
                    .remove(&bot_id)
                    .map(|b| b.summary())
                    .ok_or_else(|| Error::bot_not_found(bot_id))
            })
            .await?;

        info!(bot_id, "Bot deleted");
        Ok(summary)
    }

    async fn delete_player_bot(&self, player_id: i64, bot_id: i64) -> Result<BotSummary> {
        let summary = self
            .mutate(|state| {
                state.owned_bot(player_id, bot_id)?;
                state
                    .bots
                    .remove(&bot_id)
                    .map(|b| b.summary())
                    .ok_or_else(|| Error::bot_not_found(bot_id))
            })
            .await?;

        info!(player_id, bot_id, "Bot deleted");
        Ok(summary)
    }
}
