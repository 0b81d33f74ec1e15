// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Settings are layered: built-in defaults, then an optional configuration
//! file, then `PRODCON__SECTION__KEY` environment variables.
//!
//! ```text
//! PRODCON_CONFIG=config/engine.toml      # file (any format `config` supports)
//! PRODCON__SERVER__PORT=9100             # env override
//! PRODCON__PACING__WORK_MIN_MS=100
//! ```

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "PRODCON_CONFIG";

/// Default configuration file (extension resolved by the `config` crate)
pub const DEFAULT_CONFIG_PATH: &str = "config/engine";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub pacing: PacingConfig,
    pub broadcast: BroadcastConfig,
    pub session: SessionConfig,
    pub observability: ObservabilityConfig,
}

/// Control server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,

    /// Listen port (0 picks an ephemeral port)
    pub port: u16,

    /// Longest accepted inbound line, in bytes
    pub max_frame_bytes: usize,

    /// Send an idle snapshot as soon as a viewer connects
    pub greet_with_snapshot: bool,

    /// A viewer that accepts no bytes for this long is treated as gone
    pub write_timeout_ms: u64,

    /// Snapshots allowed to queue behind a slow viewer before it is dropped
    pub max_pending_snapshots: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9100,
            max_frame_bytes: 64 * 1024,
            greet_with_snapshot: true,
            write_timeout_ms: 2_000,
            max_pending_snapshots: 1024,
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Upper bounds on what a `start` command may ask for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_producers: usize,
    pub max_consumers: usize,
    pub max_buffer_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_producers: 64,
            max_consumers: 64,
            max_buffer_capacity: 1024,
        }
    }
}

/// Worker pacing, in milliseconds
///
/// `work` is the time spent producing or consuming one item, `rest` the pause
/// between cycles. Both are sampled uniformly from `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub work_min_ms: u64,
    pub work_max_ms: u64,
    pub rest_min_ms: u64,
    pub rest_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            work_min_ms: 800,
            work_max_ms: 2000,
            rest_min_ms: 0,
            rest_max_ms: 200,
        }
    }
}

impl PacingConfig {
    /// Fixed pacing, mostly useful in tests
    pub fn fixed(work_ms: u64, rest_ms: u64) -> Self {
        Self {
            work_min_ms: work_ms,
            work_max_ms: work_ms,
            rest_min_ms: rest_ms,
            rest_max_ms: rest_ms,
        }
    }

    /// Sample a work duration
    pub fn sample_work(&self) -> Duration {
        sample_ms(self.work_min_ms, self.work_max_ms)
    }

    /// Sample a rest duration
    pub fn sample_rest(&self) -> Duration {
        sample_ms(self.rest_min_ms, self.rest_max_ms)
    }
}

fn sample_ms(min: u64, max: u64) -> Duration {
    use rand::Rng;

    if min >= max {
        return Duration::from_millis(min);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// Snapshot delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Coalescing window after the first entry of a burst (0 disables)
    pub flush_interval_ms: u64,

    /// Re-send the latest snapshot after this much silence (0 disables)
    pub heartbeat_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
            heartbeat_ms: 1000,
        }
    }
}

impl BroadcastConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long `stop` waits for workers before aborting them
    pub join_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 5_000,
        }
    }
}

impl SessionConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging and metrics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Filter directive used when `RUST_LOG` is unset
    pub log_filter: String,

    /// Prometheus listen address, e.g. `127.0.0.1:9101`
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: "info,prodcon_engine=info".to_string(),
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `$PRODCON_CONFIG` (or the default path) and
    /// the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Load configuration from a specific file; a missing file is not an error
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {:?}", path);

        let file = path
            .to_str()
            .ok_or_else(|| EngineError::Configuration(format!("Non UTF-8 config path: {:?}", path)))?;

        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("PRODCON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce a working engine
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_producers == 0
            || self.limits.max_consumers == 0
            || self.limits.max_buffer_capacity == 0
        {
            return Err(EngineError::Configuration(
                "limits must allow at least one producer, consumer and slot".to_string(),
            ));
        }

        if self.pacing.work_min_ms > self.pacing.work_max_ms {
            return Err(EngineError::Configuration(format!(
                "pacing.work_min_ms ({}) exceeds pacing.work_max_ms ({})",
                self.pacing.work_min_ms, self.pacing.work_max_ms
            )));
        }

        if self.pacing.rest_min_ms > self.pacing.rest_max_ms {
            return Err(EngineError::Configuration(format!(
                "pacing.rest_min_ms ({}) exceeds pacing.rest_max_ms ({})",
                self.pacing.rest_min_ms, self.pacing.rest_max_ms
            )));
        }

        for (field, value) in [
            ("max_frame_bytes", self.server.max_frame_bytes as u64),
            ("write_timeout_ms", self.server.write_timeout_ms),
            ("max_pending_snapshots", self.server.max_pending_snapshots as u64),
        ] {
            if value == 0 {
                return Err(EngineError::Configuration(format!(
                    "server.{} cannot be 0",
                    field
                )));
            }
        }

        if let Some(addr) = &self.observability.metrics_addr {
            addr.parse::<std::net::SocketAddr>().map_err(|e| {
                EngineError::Configuration(format!("Invalid metrics_addr '{}': {}", addr, e))
            })?;
        }

        Ok(())
    }

    /// Control server listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.pacing.work_min_ms, 800);
        assert_eq!(config.pacing.work_max_ms, 2000);
        assert_eq!(config.limits.max_buffer_capacity, 1024);
    }

    #[test]
    fn test_inverted_pacing_rejected() {
        let config = EngineConfig {
            pacing: PacingConfig {
                work_min_ms: 500,
                work_max_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = EngineConfig::default();
        config.limits.max_producers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_server_bounds_rejected() {
        let mut config = EngineConfig::default();
        config.server.write_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("write_timeout_ms"));

        let mut config = EngineConfig::default();
        config.server.max_pending_snapshots = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_pending_snapshots"));

        assert_eq!(
            EngineConfig::default().server.write_timeout(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_listen_addr() {
        let mut config = EngineConfig::default();
        config.server.host = "0.0.0.0".to_string();
        config.server.port = 9200;
        assert_eq!(config.listen_addr(), "0.0.0.0:9200");
    }

    #[test]
    fn test_bad_metrics_addr_rejected() {
        let mut config = EngineConfig::default();
        config.observability.metrics_addr = Some("not-an-addr".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sampling_within_bounds() {
        let pacing = PacingConfig {
            work_min_ms: 10,
            work_max_ms: 20,
            rest_min_ms: 5,
            rest_max_ms: 5,
        };
        for _ in 0..100 {
            let work = pacing.sample_work();
            assert!(work >= Duration::from_millis(10));
            assert!(work <= Duration::from_millis(20));
            assert_eq!(pacing.sample_rest(), Duration::from_millis(5));
        }
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9300

[pacing]
work_min_ms = 5
work_max_ms = 10

[broadcast]
heartbeat_ms = 0

[observability]
log_format = "json"
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.server.port, 9300);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pacing.work_min_ms, 5);
        assert_eq!(config.pacing.rest_max_ms, 200);
        assert_eq!(config.broadcast.heartbeat(), None);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(dir.path().join("absent")).unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.limits, LimitsConfig::default());
    }

    #[test]
    fn test_invalid_file_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[pacing]\nrest_min_ms = 50\nrest_max_ms = 10\n").unwrap();

        assert!(EngineConfig::load_from(&path).is_err());
    }
}
