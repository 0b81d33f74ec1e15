// packages/engine/src/lib.rs
//! Prodcon Simulation Engine Library
//!
//! Runs live producer/consumer simulations over a bounded buffer and streams
//! every meaningful state change to a viewer.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **buffer**: Fixed-capacity FIFO with blocking put/take and cancellation
//! - **runtime**: Producer/consumer workers and the session that owns them
//! - **broadcast**: Journal of state changes and the snapshot broadcaster
//! - **control**: Line-delimited JSON control server and session controller
//! - **observability**: Tracing and Prometheus metrics
//! - **utils**: Configuration and error types

// Public module exports
pub mod broadcast;
pub mod buffer;
pub mod control;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use broadcast::StateSnapshot;
pub use buffer::BoundedBuffer;
pub use control::{ControlServer, SessionController};
pub use runtime::{SessionReport, SimulationConfig, SimulationSession, WorkerState};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
