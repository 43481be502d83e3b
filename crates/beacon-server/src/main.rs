//! Beacon signaling server

mod websocket;

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use beacon_core::{Dispatcher, IngressQueue, ServerConfig, ServerStats, ShutdownFlag, SignalServer};

#[derive(Parser)]
#[command(name = "beacon-server")]
#[command(about = "Beacon WebRTC signaling server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the signaling server
    Serve {
        /// Server bind address (overrides the config file)
        #[arg(short, long, env = "BEACON_ADDR")]
        addr: Option<String>,

        /// Configuration file (TOML)
        #[arg(short, long, env = "BEACON_CONFIG")]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { addr, config } => serve(addr, config).await,
    }
}

/// Load configuration, wire the fabric to the transport, run until a
/// shutdown signal arrives. Initialization failures are fatal and unwind
/// here; nothing after startup is.
async fn serve(addr: Option<String>, config_path: Option<String>) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {path}"))?;
            toml::from_str::<ServerConfig>(&raw)
                .with_context(|| format!("parsing config file {path}"))?
        }
        None => ServerConfig::default(),
    };
    if let Some(addr) = addr {
        config.bind_addr = addr;
    }
    config.validate();

    let stats = Arc::new(ServerStats::default());
    let ingress = Arc::new(IngressQueue::new(config.ingress_capacity));
    let shutdown = ShutdownFlag::new();

    let fabric = SignalServer::new(&config, Arc::clone(&stats));
    let mut dispatcher = Dispatcher::new(fabric, Arc::clone(&ingress), shutdown.clone());
    let dispatcher_thread = thread::Builder::new()
        .name("dispatcher".into())
        .spawn(move || dispatcher.run())
        .context("spawning dispatcher thread")?;

    let state = Arc::new(websocket::WsState { ingress, stats });
    let app = websocket::ws_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        max_clients = config.max_clients,
        max_rooms = config.max_rooms,
        "listening"
    );

    let transport = tokio::spawn(async move { axum::serve(listener, app).await });

    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");

    // Stop the dispatcher first so no handler runs against a dying
    // transport, then drop the listener and its connections
    shutdown.trigger();
    dispatcher_thread
        .join()
        .map_err(|_| anyhow::anyhow!("dispatcher thread panicked"))?;
    transport.abort();
    Ok(())
}
