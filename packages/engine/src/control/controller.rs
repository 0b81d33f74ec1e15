// packages/engine/src/control/controller.rs
//! Per-connection session controller
//!
//! Accepts exactly two commands, `start` and `stop`, and owns at most one
//! live [`SimulationSession`]. Snapshots of every session it starts flow to
//! the same outbound channel, so a viewer sees one continuous stream.

use crate::broadcast::snapshot::StateSnapshot;
use crate::control::protocol::Command;
use crate::observability::metrics::{self, StopReason};
use crate::runtime::session::{SessionReport, SessionSettings, SimulationConfig, SimulationSession};
use crate::utils::errors::{EngineError, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Drives one session at a time on behalf of one viewer
pub struct SessionController {
    settings: SessionSettings,
    outbound: mpsc::UnboundedSender<StateSnapshot>,
    session: Option<SimulationSession>,
}

impl SessionController {
    /// Create a controller and the receiving end of its snapshot stream
    pub fn new(settings: SessionSettings) -> (Self, mpsc::UnboundedReceiver<StateSnapshot>) {
        let (outbound, snapshots) = mpsc::unbounded_channel();
        (
            Self {
                settings,
                outbound,
                session: None,
            },
            snapshots,
        )
    }

    /// Start a session; rejected while one is running
    pub fn start(&mut self, config: SimulationConfig) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }

        let session = SimulationSession::start(config, &self.settings, self.outbound.clone())?;
        metrics::session_started();
        self.session = Some(session);
        Ok(())
    }

    /// Stop the running session, if any
    pub async fn stop(&mut self) -> Option<SessionReport> {
        self.halt(StopReason::Command).await
    }

    /// The viewer went away; stop as if it had asked to
    pub async fn connection_lost(&mut self) -> Option<SessionReport> {
        if self.is_running() {
            info!("Control connection lost with a session running, stopping it");
            metrics::connection_lost();
        }
        self.halt(StopReason::ConnectionLost).await
    }

    /// The server is going down
    pub async fn shutdown(&mut self) -> Option<SessionReport> {
        self.halt(StopReason::Shutdown).await
    }

    /// Apply one parsed command
    pub async fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Start(config) => self.start(config),
            Command::Stop => {
                self.stop().await;
                Ok(())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().map_or(false, |session| session.is_running())
    }

    /// Current state, or an idle snapshot when no session is running
    pub fn snapshot(&self) -> StateSnapshot {
        match &self.session {
            Some(session) => session.snapshot(),
            None => StateSnapshot::idle(),
        }
    }

    async fn halt(&mut self, reason: StopReason) -> Option<SessionReport> {
        // Dropping the stopped session releases its buffer
        let mut session = self.session.take()?;
        let report = session.stop().await?;

        metrics::session_stopped(reason);
        if !report.is_conserved() {
            warn!(
                "Session {} lost track of items: produced {}, consumed {}, buffered {}",
                report.session_id, report.produced, report.consumed, report.buffered
            );
        }
        info!("Session {} ended ({})", report.session_id, reason.as_str());

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::worker::WorkerState;
    use crate::utils::config::{BroadcastConfig, PacingConfig};
    use std::time::Duration;

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            pacing: PacingConfig::fixed(2, 0),
            broadcast: BroadcastConfig {
                flush_interval_ms: 0,
                heartbeat_ms: 0,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (mut controller, _snapshots) = SessionController::new(fast_settings());

        controller.start(SimulationConfig::new(1, 1, 2)).unwrap();
        let err = controller.start(SimulationConfig::new(4, 4, 4)).unwrap_err();

        assert!(matches!(err, EngineError::AlreadyRunning));
        assert!(controller.is_running());
        // The running session was not replaced
        assert_eq!(controller.snapshot().capacity, 2);

        assert!(controller.stop().await.is_some());
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_invalid_start_leaves_controller_idle() {
        let (mut controller, mut snapshots) = SessionController::new(fast_settings());

        let err = controller.start(SimulationConfig::new(1, 1, 0)).unwrap_err();
        assert_eq!(err.code(), "configuration_error");
        assert!(!controller.is_running());
        assert_eq!(controller.snapshot(), StateSnapshot::idle());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(snapshots.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let (mut controller, _snapshots) = SessionController::new(fast_settings());
        assert!(controller.stop().await.is_none());
        assert!(controller.handle(Command::Stop).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_after_stop_shares_stream() {
        let (mut controller, mut snapshots) = SessionController::new(fast_settings());

        controller.handle(Command::Start(SimulationConfig::new(1, 1, 1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        controller.handle(Command::Stop).await.unwrap();

        controller.handle(Command::Start(SimulationConfig::new(2, 1, 3))).await.unwrap();
        let report = controller.connection_lost().await.unwrap();
        assert!(report.is_conserved());
        drop(controller);

        let mut delivered = vec![];
        while let Some(snapshot) = snapshots.recv().await {
            delivered.push(snapshot);
        }

        let halts: Vec<_> = delivered.iter().filter(|s| !s.running).collect();
        assert_eq!(halts.len(), 2);
        assert!(halts.iter().all(|s| s.all_stopped()));

        let last = delivered.last().unwrap();
        assert_eq!(last.capacity, 3);
        assert!(!last.running);
        assert!(last
            .workers()
            .all(|worker| worker.state == WorkerState::Stopped));
    }
}
