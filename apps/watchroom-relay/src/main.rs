//! Watchroom Relay - standalone pub/sub relay and room directory.
//!
//! Peers connect over WebSocket and exchange room messages on per-room
//! topics. The relay also serves the room directory and the video catalog.

mod config;
mod rooms;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use watchroom_core::api::{bind, serve};
use watchroom_core::RelayState;

use crate::config::RelayConfig;

/// Watchroom Relay - pub/sub relay for shared watch rooms.
#[derive(Parser, Debug)]
#[command(name = "watchroom-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "WATCHROOM_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "WATCHROOM_BIND_PORT")]
    port: Option<u16>,

    /// Catalog file (overrides config file).
    #[arg(long, env = "WATCHROOM_CATALOG_FILE")]
    catalog_file: Option<PathBuf>,

    /// Data directory for the persisted room directory.
    #[arg(short = 'd', long, env = "WATCHROOM_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Watchroom Relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(catalog_file) = args.catalog_file {
        config.catalog_file = Some(catalog_file);
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    let catalog = config.load_catalog().context("Failed to load catalog")?;
    log::info!(
        "Configuration: bind_port={}, catalog={} video(s), trusted_origins={:?}",
        config.bind_port,
        catalog.len(),
        config.trusted_origins
    );

    let state = RelayState::builder()
        .catalog(catalog)
        .trusted_origins(config.trusted_origins.clone())
        .build();

    if let Some(ref data_dir) = config.data_dir {
        let restored = rooms::restore(&state, data_dir).context("Failed to restore rooms")?;
        log::info!(
            "Using data directory {} ({} room(s) restored)",
            data_dir.display(),
            restored
        );
    } else {
        log::info!("No data directory configured - rooms will not persist");
    }

    let (port, listener) = bind(config.bind_port)
        .await
        .context("Failed to bind relay port")?;
    log::info!("Relay listening on http://0.0.0.0:{}", port);

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, server_state).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    let closed = state.ws_manager.close_all();
    log::info!("Closed {} connection(s)", closed);

    if let Some(ref data_dir) = config.data_dir {
        match rooms::persist(&state, data_dir) {
            Ok(count) => log::info!("Persisted {} room(s)", count),
            Err(e) => log::error!("Failed to persist rooms: {:#}", e),
        }
    }

    server_handle.abort();
    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
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
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
