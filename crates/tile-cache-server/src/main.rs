//! Tile Cache Server - persistent map tile cache over HTTP
//!
//! Serves cached tiles from a local SQLite store and sweeps expired and
//! least recently used tiles in the background.

mod error;
mod server;
mod types;

use crate::error::{Result, ServerError};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ServerConfig;
use std::sync::Arc;
use tile_cache::{CacheConfig, CacheManager};
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("tile_cache_server=info".parse()?)
        .add_directive("tile_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Tile Cache Server...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Store: {:?}", config.cache.store_path());
    info!("Max items: {}", config.cache.max_items);
    info!("Max age: {} seconds", config.cache.max_age.as_secs());
    info!(
        "Cleanup interval: {} seconds",
        config.cache.cleanup_interval.as_secs()
    );

    let cache = CacheManager::new(config.cache)?;
    cache.init().await?;

    let state: SharedState = Arc::new(ServerState::new(cache));

    // Serve until Ctrl-C, then stop the sweeper and close the store
    let result = start_server(state.clone(), config.port, shutdown_signal()).await;
    state.cache.shutdown().await;
    result?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn load_config() -> Result<ServerConfig> {
    let port = match std::env::var("PORT") {
        Ok(s) => s
            .parse::<u16>()
            .map_err(|_| ServerError::Config(format!("invalid PORT: {}", s)))?,
        Err(_) => ServerConfig::default().port,
    };

    Ok(ServerConfig {
        port,
        cache: CacheConfig::from_env(),
    })
}
