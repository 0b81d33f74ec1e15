// packages/engine/src/utils/errors.rs
//! Engine error taxonomy
//!
//! Every failure is local to one command or one connection: nothing here is
//! fatal to the process, and the controller stays ready for a fresh `start`.

use thiserror::Error;

/// Engine-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the simulation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid start configuration (missing, non-integer, non-positive or
    /// out-of-range counts)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// `start` received while a session is live
    #[error("A simulation is already running")]
    AlreadyRunning,

    /// Inbound message could not be understood
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// The control channel went away
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A worker task panicked or could not be joined
    #[error("Worker join failed: {0}")]
    WorkerJoin(String),

    /// Engine settings could not be loaded
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Logger or metrics exporter could not be installed
    #[error("Observability error: {0}")]
    Observability(String),
}

impl EngineError {
    /// Stable code sent to clients in `error` replies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration_error",
            EngineError::AlreadyRunning => "already_running",
            EngineError::MalformedCommand(_) => "malformed_command",
            EngineError::ConnectionLost(_) => "connection_lost",
            EngineError::WorkerJoin(_) => "worker_join_failed",
            EngineError::Config(_) => "config_error",
            EngineError::Io(_) => "io_error",
            EngineError::Serialization(_) => "serialization_error",
            EngineError::Observability(_) => "observability_error",
        }
    }

    /// Whether the error should be reported back to the client rather than
    /// tearing the connection down
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Configuration(_)
                | EngineError::AlreadyRunning
                | EngineError::MalformedCommand(_)
        )
    }
}
