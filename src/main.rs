//! Player manager - players, bots, and a token-guarded HTTP API

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use playermgr::{
    api::PlayerServer,
    auth::Authorizer,
    cli::{Cli, Command, CreateCommand},
    config::Config,
    model::NewBot,
    setup_tracing,
    store::open_store,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(ref path) = cli.store {
                config.store.path = Some(path.clone());
            }
            if let Some(backend) = cli.store_backend {
                config.store.backend = backend;
            }
            if let Some(ref url) = cli.store_url {
                config.store.url = Some(url.clone());
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Serve {
            host,
            port,
            security_mode,
            realm_url,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(mode) = security_mode {
                config.security.mode = mode;
            }
            if let Some(url) = realm_url {
                config.security.realm_url = Some(url);
            }
            run_server(config).await
        }
        command => match run_command(&config, command).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Run the API server
async fn run_server(config: Config) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let store = match open_store(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open player store: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        mode = %config.security.mode,
        store = %config.store.backend,
        store_path = ?config.store.path,
        "Starting player manager"
    );

    let authorizer = Arc::new(Authorizer::from_config(&config.security));
    let server = PlayerServer::new(config, store, authorizer);

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Player manager shutdown complete");
    ExitCode::SUCCESS
}

/// Run a one-shot store command and print its result
async fn run_command(config: &Config, command: Command) -> anyhow::Result<()> {
    let store = open_store(&config.store)
        .await
        .context("Failed to open player store")?;

    match command {
        Command::Get { player: None } => print_json(&store.players_with_bots().await?),
        Command::Get {
            player: Some(player),
        } => {
            let found = if let Ok(id) = player.parse::<i64>() {
                store.player(id).await?
            } else {
                store
                    .player_by_name(&player)
                    .await?
                    .with_context(|| format!("No player named {player}"))?
            };
            print_json(&found)
        }
        Command::Create(CreateCommand::Player { name }) => {
            print_json(&store.add_player(&name).await?)
        }
        Command::Create(CreateCommand::Bot {
            player_id,
            name,
            file,
        }) => {
            let botcode = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read bot code from {}", file.display()))?;
            let bot = NewBot {
                name,
                filename: file.to_string_lossy().into_owned(),
                botcode,
            };
            print_json(&store.add_bot(player_id, bot).await?)
        }
        Command::Delete { player_id, bot_id } => {
            if let Some(id) = player_id {
                print_json(&store.delete_player(id).await?)?;
            }
            if let Some(id) = bot_id {
                print_json(&store.delete_bot(id).await?)?;
            }
            Ok(())
        }
        Command::Serve { .. } => anyhow::bail!("serve is not a store command"),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
