//! Fog Map Relay Server
//!
//! Reads configuration from the environment and serves until Ctrl-C.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fogmap_relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env();

    info!("Fog Map Relay v{}", config.version);
    info!("Session timeout: {} seconds", config.registry.session_timeout.as_secs());
    info!("Session code length: {} digits", config.registry.code_length);
    match config.registry.max_sessions {
        Some(max) => info!("Session limit: {}", max),
        None => info!("Session limit: none"),
    }

    let server = Arc::new(RelayServer::new(config));
    let listener = server.bind().await?;

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_server.shutdown(),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.serve(listener).await?;

    info!("Relay stopped with {} live sessions", server.session_count().await);
    Ok(())
}
