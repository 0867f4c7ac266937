//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{SecurityMode, StoreBackend};

/// Player manager - players, their bots, and the API that serves them
#[derive(Parser, Debug)]
#[command(name = "playermgr")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PLAYERMGR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// JSON snapshot or SQLite file holding players and bots (overrides `store.path`)
    #[arg(long, env = "PLAYERMGR_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Store backend: json, sqlite or postgres (overrides `store.backend`)
    #[arg(short = 't', long, env = "PLAYERMGR_STORE_BACKEND", global = true)]
    pub store_backend: Option<StoreBackend>,

    /// Database URL (overrides `store.url`)
    #[arg(long, env = "PLAYERMGR_STORE_URL", global = true)]
    pub store_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "PLAYERMGR_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PLAYERMGR_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Security mode (open, secured)
        #[arg(short, long)]
        security_mode: Option<SecurityMode>,

        /// Realm info URL serving the token signing key
        #[arg(short = 'a', long)]
        realm_url: Option<String>,
    },

    /// Show players: all, or one by id or name
    Get {
        /// Player id or name
        player: Option<String>,
    },

    /// Create a player or a bot
    #[command(subcommand)]
    Create(CreateCommand),

    /// Delete a player (and its bots) or a bot
    #[command(group(
        clap::ArgGroup::new("target")
            .required(true)
            .multiple(true)
            .args(["player_id", "bot_id"])
    ))]
    Delete {
        /// Id of the player to delete
        #[arg(short = 'P', long)]
        player_id: Option<i64>,

        /// Id of the bot to delete
        #[arg(short = 'B', long)]
        bot_id: Option<i64>,
    },
}

/// Create subcommands
#[derive(Subcommand, Debug)]
pub enum CreateCommand {
    /// Register a player
    Player {
        /// Player name
        name: String,
    },

    /// Upload a bot for a player
    Bot {
        /// Owning player id
        player_id: i64,

        /// Bot name
        name: String,

        /// File holding the bot's code
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::parse_from([
            "playermgr",
            "--store",
            "/tmp/players.json",
            "serve",
            "--port",
            "9000",
            "--security-mode",
            "open",
        ]);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/players.json")));
        match cli.command {
            Command::Serve {
                port,
                security_mode,
                ..
            } => {
                assert_eq!(port, Some(9000));
                assert_eq!(security_mode, Some(SecurityMode::Open));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_create_bot() {
        let cli = Cli::parse_from(["playermgr", "create", "bot", "3", "runner", "bots/runner.js"]);
        match cli.command {
            Command::Create(CreateCommand::Bot {
                player_id,
                name,
                file,
            }) => {
                assert_eq!(player_id, 3);
                assert_eq!(name, "runner");
                assert_eq!(file, PathBuf::from("bots/runner.js"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn delete_requires_a_target() {
        assert!(Cli::try_parse_from(["playermgr", "delete"]).is_err());

        let cli = Cli::try_parse_from(["playermgr", "delete", "-P", "1", "-B", "2"]).unwrap();
        match cli.command {
            Command::Delete { player_id, bot_id } => {
                assert_eq!(player_id, Some(1));
                assert_eq!(bot_id, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_store_backend() {
        let cli = Cli::parse_from([
            "playermgr",
            "get",
            "--store-backend",
            "postgres",
            "--store-url",
            "postgres://db.internal/players",
        ]);
        assert_eq!(cli.store_backend, Some(StoreBackend::Postgres));
        assert_eq!(cli.store_url.as_deref(), Some("postgres://db.internal/players"));

        assert!(Cli::try_parse_from(["playermgr", "-t", "mysql", "get"]).is_err());
    }

    #[test]
    fn rejects_unknown_security_mode() {
        assert!(Cli::try_parse_from(["playermgr", "serve", "--security-mode", "lax"]).is_err());
    }
}
