//! Relational store on SQLite or PostgreSQL.
//!
//! Tables are created on connect when missing. Bots reference their owner
//! through a foreign key with `ON DELETE CASCADE`, so removing a player
//! removes its bots in the same statement. Multi-step operations run in a
//! transaction.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Schema, SqlErr,
    SqlxSqliteConnector, TransactionTrait,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

use super::entity::{bot, player};
use super::{PlayerStore, checked_bot, new_player_name, normalize_name};
use crate::config::{StoreBackend, StoreConfig};
use crate::model::{Bot, BotCode, BotSummary, BotWithPlayer, NewBot, Player};
use crate::{Error, Result};

/// Player store on a SQL database
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    /// Connect to the database named by `config` and create missing tables.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let db = match config.backend {
            StoreBackend::Postgres => {
                let mut options = ConnectOptions::new(config.postgres_url()?);
                options.sqlx_logging(false);
                Database::connect(options).await?
            }
            StoreBackend::Sqlite => sqlite_connection(config).await?,
            StoreBackend::Json => {
                return Err(Error::Config(
                    "the json store backend is not a database".to_string(),
                ));
            }
        };

        info!(backend = %config.backend, "Connected to player database");
        Self::with_connection(db).await
    }

    /// Fresh in-memory SQLite database
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&StoreConfig {
            backend: StoreBackend::Sqlite,
            ..StoreConfig::default()
        })
        .await
    }

    /// Use an existing connection, creating missing tables.
    pub async fn with_connection(db: DatabaseConnection) -> Result<Self> {
        create_schema(&db).await?;
        Ok(Self { db })
    }

    async fn bots_of<C: ConnectionTrait>(conn: &C, player_id: i64) -> Result<Vec<Bot>> {
        let bots = bot::Entity::find()
            .filter(bot::Column::PlayerId.eq(player_id))
            .order_by_asc(bot::Column::Id)
            .all(conn)
            .await?;
        Ok(bots.iter().map(bot_view).collect())
    }

    async fn find_player<C: ConnectionTrait>(conn: &C, id: i64) -> Result<player::Model> {
        player::Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| Error::player_not_found(id))
    }

    async fn owned_bot<C: ConnectionTrait>(
        conn: &C,
        player_id: i64,
        bot_id: i64,
    ) -> Result<(player::Model, bot::Model)> {
        let owner = Self::find_player(conn, player_id).await?;
        let bot = bot::Entity::find_by_id(bot_id)
            .filter(bot::Column::PlayerId.eq(player_id))
            .one(conn)
            .await?
            .ok_or_else(|| Error::bot_not_found(bot_id))?;
        Ok((owner, bot))
    }
}

/// SQLite pool holding a single long-lived connection.
///
/// An in-memory database exists only as long as its connection, so the
/// connection is never recycled.
async fn sqlite_connection(config: &StoreConfig) -> Result<DatabaseConnection> {
    let options = match (&config.url, &config.path) {
        (Some(url), _) => SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("Invalid store.url: {e}")))?,
        (None, Some(path)) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        (None, None) => SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Internal(format!("SQLite memory options: {e}")))?,
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options.foreign_keys(true))
        .await
        .map_err(|e| Error::Internal(format!("Cannot open SQLite database: {e}")))?;

    Ok(SqlxSqliteConnector::from_sqlx_sqlite_pool(pool))
}

async fn create_schema(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    // Parent table first for the foreign key
    let mut players = schema.create_table_from_entity(player::Entity);
    players.if_not_exists();
    db.execute(backend.build(&players)).await?;

    let mut bots = schema.create_table_from_entity(bot::Entity);
    bots.if_not_exists();
    db.execute(backend.build(&bots)).await?;

    debug!(?backend, "Player schema ready");
    Ok(())
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn bot_view(model: &bot::Model) -> Bot {
    Bot {
        id: model.id,
        name: model.name.clone(),
        filename: model.filename.clone(),
    }
}

fn bot_summary(model: &bot::Model) -> BotSummary {
    BotSummary {
        id: model.id,
        name: model.name.clone(),
    }
}

#[async_trait]
impl PlayerStore for SqlStore {
    async fn players(&self) -> Result<Vec<Player>> {
        let players = player::Entity::find()
            .order_by_asc(player::Column::Id)
            .all(&self.db)
            .await?;
        Ok(players
            .into_iter()
            .map(|p| Player::new(p.id, p.name))
            .collect())
    }

    async fn players_with_bots(&self) -> Result<Vec<Player>> {
        let txn = self.db.begin().await?;
        let players = player::Entity::find()
            .order_by_asc(player::Column::Id)
            .all(&txn)
            .await?;
        let bots = bot::Entity::find()
            .order_by_asc(bot::Column::Id)
            .all(&txn)
            .await?;
        txn.commit().await?;

        let mut by_owner: BTreeMap<i64, Vec<Bot>> = BTreeMap::new();
        for bot in &bots {
            by_owner.entry(bot.player_id).or_default().push(bot_view(bot));
        }
        Ok(players
            .into_iter()
            .map(|p| Player {
                bots: by_owner.remove(&p.id).unwrap_or_default(),
                ..Player::new(p.id, p.name)
            })
            .collect())
    }

    async fn player(&self, id: i64) -> Result<Player> {
        let txn = self.db.begin().await?;
        let found = Self::find_player(&txn, id).await?;
        let bots = Self::bots_of(&txn, id).await?;
        txn.commit().await?;

        Ok(Player {
            bots,
            ..Player::new(found.id, found.name)
        })
    }

    async fn player_by_name(&self, name: &str) -> Result<Option<Player>> {
        let name = normalize_name(name);
        let txn = self.db.begin().await?;
        let Some(found) = player::Entity::find()
            .filter(player::Column::Name.eq(name))
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };
        let bots = Self::bots_of(&txn, found.id).await?;
        txn.commit().await?;

        Ok(Some(Player {
            bots,
            ..Player::new(found.id, found.name)
        }))
    }

    async fn add_player(&self, name: &str) -> Result<Player> {
        let name = new_player_name(name)?;

        let inserted = player::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("player {name} already exists"))
            } else {
                e.into()
            }
        })?;

        info!(player_id = inserted.id, name = %inserted.name, "Player added");
        Ok(Player::new(inserted.id, inserted.name))
    }

    async fn delete_player(&self, id: i64) -> Result<Player> {
        let txn = self.db.begin().await?;
        let found = Self::find_player(&txn, id).await?;
        let bots = Self::bots_of(&txn, id).await?;
        // Bots go with the player through the foreign key
        player::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(player_id = id, bots = bots.len(), "Player deleted");
        Ok(Player {
            bots,
            ..Player::new(found.id, found.name)
        })
    }

    async fn player_bots(&self, player_id: i64) -> Result<Vec<Bot>> {
        let txn = self.db.begin().await?;
        Self::find_player(&txn, player_id).await?;
        let bots = Self::bots_of(&txn, player_id).await?;
        txn.commit().await?;
        Ok(bots)
    }

    async fn add_bot(&self, player_id: i64, bot: NewBot) -> Result<BotSummary> {
        let bot = checked_bot(bot)?;

        let txn = self.db.begin().await?;
        Self::find_player(&txn, player_id).await?;
        let inserted = bot::ActiveModel {
            player_id: Set(player_id),
            name: Set(bot.name),
            filename: Set(bot.filename),
            botcode: Set(bot.botcode),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(player_id, bot_id = inserted.id, name = %inserted.name, "Bot added");
        Ok(bot_summary(&inserted))
    }

    async fn bot(&self, player_id: i64, bot_id: i64) -> Result<BotWithPlayer> {
        let (owner, bot) = Self::owned_bot(&self.db, player_id, bot_id).await?;
        Ok(BotWithPlayer {
            id: bot.id,
            name: bot.name,
            filename: bot.filename,
            player_name: owner.name,
        })
    }

    async fn bot_code(&self, player_id: i64, bot_id: i64) -> Result<BotCode> {
        let (_, bot) = Self::owned_bot(&self.db, player_id, bot_id).await?;
        Ok(BotCode {
            id: bot.id,
            name: bot.name,
            filename: bot.filename,
            botcode: bot.botcode,
        })
    }

    async fn delete_bot(&self, bot_id: i64) -> Result<BotSummary> {
        let txn = self.db.begin().await?;
        let found = bot::Entity::find_by_id(bot_id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::bot_not_found(bot_id))?;
        bot::Entity::delete_by_id(bot_id).exec(&txn).await?;
        txn.commit().await?;

        info!(bot_id, "Bot deleted");
        Ok(bot_summary(&found))
    }

    async fn delete_player_bot(&self, player_id: i64, bot_id: i64) -> Result<BotSummary> {
        let txn = self.db.begin().await?;
        let (_, found) = Self::owned_bot(&txn, player_id, bot_id).await?;
        bot::Entity::delete_by_id(bot_id).exec(&txn).await?;
        txn.commit().await?;

        info!(player_id, bot_id, "Bot deleted");
        Ok(bot_summary(&found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sea_orm::PaginatorTrait;

    fn new_bot(name: &str, filename: &str) -> NewBot {
        NewBot {
            name: name.to_string(),
            filename: filename.to_string(),
            botcode: "function move() { return 'N'; }".to_string(),
        }
    }

    #[tokio::test]
    async fn players_and_bots_round_trip() {
        let store = SqlStore::in_memory().await.unwrap();
        assert_eq!(store.add_player("joe").await.unwrap().id, 1);
        assert_eq!(store.add_player("jack").await.unwrap().id, 2);
        let added = store
            .add_bot(1, new_bot(" runner ", "/home/joe/bots/runner.js"))
            .await
            .unwrap();
        assert_eq!(added.name, "runner");

        let joe = store.player(1).await.unwrap();
        assert_eq!(joe.bots.len(), 1);
        assert_eq!(joe.bots[0].filename, "runner.js");

        let all = store.players_with_bots().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].bots.is_empty());
        assert!(store.players().await.unwrap()[0].bots.is_empty());

        let code = store.bot_code(1, added.id).await.unwrap();
        assert!(code.botcode.contains("move"));
        assert_eq!(store.bot(1, added.id).await.unwrap().player_name, "joe");
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let store = SqlStore::in_memory().await.unwrap();
        store.add_player("joe").await.unwrap();

        assert!(matches!(store.add_player(" joe").await, Err(Error::Conflict(_))));
        assert!(matches!(store.add_player("").await, Err(Error::InvalidInput(_))));
        assert_eq!(store.players().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn name_lookup_ignores_surrounding_blanks() {
        let store = SqlStore::in_memory().await.unwrap();
        store.add_player("joe").await.unwrap();

        let found = store.player_by_name_or_create(" joe ").await.unwrap();
        assert_eq!(found.id, 1);
        assert!(store.player_by_name("jill").await.unwrap().is_none());
        assert_eq!(store.player_by_name_or_create("jill").await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn delete_player_cascades_through_foreign_key() {
        let store = SqlStore::in_memory().await.unwrap();
        store.add_player("joe").await.unwrap();
        store.add_player("jack").await.unwrap();
        store.add_bot(1, new_bot("a", "a.js")).await.unwrap();
        store.add_bot(1, new_bot("b", "b.js")).await.unwrap();
        store.add_bot(2, new_bot("c", "c.js")).await.unwrap();

        let deleted = store.delete_player(1).await.unwrap();
        assert_eq!(deleted.bots.len(), 2);

        // Only the database removed the bot rows
        let remaining = bot::Entity::find().count(&store.db).await.unwrap();
        assert_eq!(remaining, 1);
        assert!(matches!(store.player(1).await, Err(Error::NotFound(_))));
        assert!(matches!(store.delete_bot(1).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn bot_operations_check_owner() {
        let store = SqlStore::in_memory().await.unwrap();
        store.add_player("joe").await.unwrap();
        store.add_player("jack").await.unwrap();
        store.add_bot(1, new_bot("a", "a.js")).await.unwrap();

        assert!(matches!(store.bot(2, 1).await, Err(Error::NotFound(_))));
        assert!(matches!(store.bot_code(2, 1).await, Err(Error::NotFound(_))));
        assert!(matches!(store.delete_player_bot(2, 1).await, Err(Error::NotFound(_))));
        assert!(matches!(
            store.add_bot(9, new_bot("x", "x.js")).await,
            Err(Error::NotFound(_))
        ));

        assert_eq!(store.delete_player_bot(1, 1).await.unwrap().name, "a");
        assert!(store.player_bots(1).await.unwrap().is_empty());
        assert!(matches!(store.player_bots(9).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn sqlite_file_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: Some(dir.path().join("data").join("players.db")),
            ..StoreConfig::default()
        };

        {
            let store = SqlStore::connect(&config).await.unwrap();
            store.add_player("joe").await.unwrap();
            store.add_bot(1, new_bot("a", "a.js")).await.unwrap();
        }

        let store = SqlStore::connect(&config).await.unwrap();
        let players = store.players_with_bots().await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].bots[0].name, "a");
    }
}
