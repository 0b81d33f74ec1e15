// packages/engine/src/main.rs
//! Prodcon Simulation Engine
//!
//! Serves live bounded-buffer producer/consumer simulations to viewers over
//! a line-delimited JSON control channel.

use anyhow::{Context, Result};
use prodcon_engine::control::ControlServer;
use prodcon_engine::observability::{init_metrics, init_tracing};
use prodcon_engine::utils::config::EngineConfig;
use prodcon_engine::BuildInfo;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    let build = BuildInfo::current();
    info!(
        "Starting Prodcon Simulation Engine v{} ({}, built {})",
        build.version, build.git_hash, build.build_timestamp
    );
    info!("Configuration loaded: {:?}", config);

    let server = ControlServer::new(&config);
    let listener = server.bind().await?;

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    match server.serve(listener, shutdown_signal).await {
        Ok(()) => {
            info!("Server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}
