use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use linegem::agent::Agent;
use linegem::channels::{self, AppState, LineClient};
use linegem::config::Config;
use linegem::history::SnapshotStore;
use linegem::providers::create_provider;
use linegem::sessions::{EvictionSweeper, SessionRegistry};
use linegem::tools::default_tools;

/// linegem - LINE webhook bot backed by Gemini with bounded, disk-backed
/// per-user conversation history.
#[derive(Parser, Debug)]
#[command(name = "linegem")]
#[command(version)]
#[command(about = "LINE chat bot bridging to Gemini.", long_about = None)]
struct Cli {
    /// Override the config directory (default: ~/.linegem)
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook gateway and eviction sweeper
    Start {
        /// Override the configured gateway port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write a starter config.toml
    Init,
    /// Print the effective configuration (secrets elided)
    ConfigShow,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => start(cli.config_dir.as_deref(), port).await,
        Commands::Init => init(cli.config_dir.as_deref()),
        Commands::ConfigShow => config_show(cli.config_dir.as_deref()),
    }
}

fn init(config_dir: Option<&str>) -> Result<()> {
    let dir = Config::resolve_config_dir(config_dir);
    let path = dir.join("config.toml");
    Config::write_default(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn config_show(config_dir: Option<&str>) -> Result<()> {
    let config = Config::load(config_dir)?;
    println!("config dir:     {}", config.config_dir.display());
    println!("history dir:    {}", config.history_dir().display());
    println!("window size:    {}", config.history.max_messages);
    println!("idle threshold: {}s", config.history.idle_threshold_secs);
    println!("sweep interval: {}s", config.history.sweep_interval_secs);
    println!("text model:     {}", config.gemini.text_model);
    println!("vision model:   {}", config.gemini.vision_model);
    println!(
        "gateway:        {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "line secret:    {}",
        if config.line.channel_secret.is_some() { "set" } else { "missing" }
    );
    println!(
        "gemini api key: {}",
        if config.gemini.api_key.is_some() { "set" } else { "missing" }
    );
    Ok(())
}

async fn start(config_dir: Option<&str>, port_override: Option<u16>) -> Result<()> {
    let config = Config::load(config_dir)?;
    config.validate()?;

    // Failure to create the snapshot directory is the one fatal storage
    // condition; everything after this degrades gracefully.
    let store = SnapshotStore::new(config.history_dir());
    store
        .ensure_base_dir()
        .await
        .with_context(|| format!("failed to create history dir {}", store.base_dir().display()))?;
    info!(dir = %store.base_dir().display(), "history snapshot directory ready");

    let registry = Arc::new(SessionRegistry::new(config.history.max_messages, store));
    let provider = create_provider(&config);
    let agent = Arc::new(Agent::new(
        registry.clone(),
        provider,
        default_tools(),
        config.gemini.text_model.clone(),
        config.gemini.vision_model.clone(),
    ));

    let cancel = CancellationToken::new();
    let sweeper_handle = EvictionSweeper::new(
        registry.clone(),
        Duration::from_secs(config.history.sweep_interval_secs),
        Duration::from_secs(config.history.idle_threshold_secs),
        cancel.child_token(),
    )
    .spawn();

    let state = AppState {
        agent,
        line: Arc::new(LineClient::new(
            config
                .line
                .channel_access_token
                .as_deref()
                .unwrap_or_default(),
        )),
        channel_secret: Arc::from(
            config.line.channel_secret.as_deref().unwrap_or_default(),
        ),
    };
    let port = port_override.unwrap_or(config.gateway.port);
    let host = config.gateway.host.clone();
    let server_cancel = cancel.child_token();
    let server_handle =
        tokio::spawn(async move { channels::serve(state, &host, port, server_cancel).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    // Stop the sweeper and the gateway, waiting for any in-flight flush to
    // finish before the final unconditional flush.
    cancel.cancel();
    if sweeper_handle.await.is_err() {
        warn!("eviction sweeper ended abnormally");
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "gateway ended with error"),
        Err(_) => warn!("gateway task ended abnormally"),
    }

    registry.flush_all().await;
    info!("shutdown complete");
    Ok(())
}
