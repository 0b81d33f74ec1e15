// packages/engine/src/observability/mod.rs
//! Observability: structured logging and Prometheus metrics
//!
//! - **Tracing**: `tracing-subscriber` with an `EnvFilter`; `RUST_LOG` wins
//!   over the configured filter. Human or JSON output.
//! - **Metrics**: `metrics` facade, exported by `metrics-exporter-prometheus`
//!   when a listen address is configured. Without an exporter the macros are
//!   no-ops.

pub mod metrics;

use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| EngineError::Observability(format!("Invalid log filter: {}", e)))?;

    let result = match config.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
    };

    result.map_err(|e| EngineError::Observability(format!("Failed to init tracing: {}", e)))
}

/// Install the Prometheus exporter if `metrics_addr` is set
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(addr) = &config.metrics_addr else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| EngineError::Observability(format!("Invalid metrics address '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Observability(format!("Failed to install exporter: {}", e)))?;

    self::metrics::describe_all();
    info!("Prometheus metrics exposed on http://{}/metrics", addr);
    Ok(())
}
