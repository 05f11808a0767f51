use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

use ariana_sync::config::default_config_dir;
use ariana_sync::{SyncClient, SyncConfig, WsConnector};

mod commands;
mod signals;

#[derive(Parser)]
#[command(name = "ariana")]
#[command(about = "Stream live Ariana state as JSON lines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory (defaults to ~/.ariana)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// WebSocket endpoint, overrides `server.ws_url`
    #[arg(long, global = true)]
    url: Option<String>,

    /// Bearer token, overrides `server.token`
    #[arg(long, global = true)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the projects list
    Projects,
    /// Stream the agents list
    Agents(AgentsArgs),
    /// Stream one agent's event log
    Events(EventsArgs),
    /// Periodically tell the server these agents are still wanted
    KeepAlive(KeepAliveArgs),
}

#[derive(Parser)]
struct AgentsArgs {
    /// Only this project's agents
    #[arg(long)]
    project: Option<String>,
}

#[derive(Parser)]
struct EventsArgs {
    /// Agent to focus
    #[arg(long)]
    agent: String,

    /// Pages of older history to request once the server reports more
    #[arg(long, default_value = "0")]
    older: u32,
}

#[derive(Parser)]
struct KeepAliveArgs {
    /// Agent ids to keep alive (repeatable)
    #[arg(long = "agent", required = true)]
    agents: Vec<String>,

    /// Seconds between keep-alives
    #[arg(long, default_value = "30")]
    interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only JSON lines.
    let default_directive = if cli.debug {
        "ariana_sync=debug,ariana=debug"
    } else {
        "ariana_sync=info,ariana=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => default_config_dir().context("Failed to resolve config directory")?,
    };
    let mut config = SyncConfig::load(&config_dir)
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;
    if let Some(url) = cli.url {
        config.server.ws_url = url;
    }
    if let Some(token) = cli.token {
        config.server.token = Some(token);
    }
    let token = config
        .server
        .token
        .clone()
        .context("No token configured: pass --token or set ARIANA_SERVER__TOKEN")?;

    info!(url = %config.server.ws_url, "connecting");
    let client = SyncClient::spawn(WsConnector::new(config.server.ws_url.clone()), &config);
    client.connect(token);

    let result = match cli.command {
        Commands::Projects => commands::projects(&client).await,
        Commands::Agents(args) => commands::agents(&client, args.project).await,
        Commands::Events(args) => {
            commands::events(&client, config.events.clone(), &args.agent, args.older).await
        }
        Commands::KeepAlive(args) => {
            commands::keep_alive(&client, args.agents, args.interval_secs).await
        }
    };

    client.disconnect();
    client.shutdown().await;
    result
}
