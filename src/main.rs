//! Codenames Session Server
//!
//! Serves sessions over WebSocket until interrupted.

use tracing::info;
use tracing_subscriber::EnvFilter;

use codenames::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Codenames Server v{}", VERSION);
    info!("Max connections: {}, channel capacity: {}", config.max_connections, config.channel_capacity);
    if config.auth.is_configured() {
        info!("JWT authentication enabled");
    }
    if let Some(seed) = config.master_seed {
        info!("Master seed: {:#018x}", seed);
    }

    let server = GameServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
            // Give connections a moment to receive the notice
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    Ok(())
}
