// packages/engine/src/runtime/session.rs
//! Simulation session lifecycle
//!
//! A session owns everything one `start` creates: the buffer, the worker
//! tasks, their state cells and the broadcaster. It is started with a
//! validated [`SimulationConfig`] and torn down by [`SimulationSession::stop`].

use crate::broadcast::broadcaster::{BroadcastStats, SnapshotSink, StateBroadcaster};
use crate::broadcast::journal::{Journal, JournalEntry};
use crate::broadcast::snapshot::StateSnapshot;
use crate::buffer::{BoundedBuffer, BufferStats};
use crate::runtime::worker::{
    ItemSequencer, Role, Worker, WorkerCell, WorkerContext, WorkerState, WorkerSummary,
};
use crate::runtime::Item;
use crate::utils::config::{
    BroadcastConfig, EngineConfig, LimitsConfig, PacingConfig, SessionConfig,
};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Parameters of one simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub producer_count: usize,
    pub consumer_count: usize,
    pub buffer_capacity: usize,
}

impl SimulationConfig {
    pub fn new(producer_count: usize, consumer_count: usize, buffer_capacity: usize) -> Self {
        Self {
            producer_count,
            consumer_count,
            buffer_capacity,
        }
    }

    /// Reject zero counts and anything above `limits`
    pub fn validate(&self, limits: &LimitsConfig) -> Result<()> {
        let checks = [
            ("producerCount", self.producer_count, limits.max_producers),
            ("consumerCount", self.consumer_count, limits.max_consumers),
            ("bufferCapacity", self.buffer_capacity, limits.max_buffer_capacity),
        ];

        for (field, value, max) in checks {
            if value == 0 {
                return Err(EngineError::Configuration(format!(
                    "{} must be at least 1",
                    field
                )));
            }
            if value > max {
                return Err(EngineError::Configuration(format!(
                    "{} must be at most {}, got {}",
                    field, max, value
                )));
            }
        }

        Ok(())
    }
}

/// Engine settings a session runs under
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSettings {
    pub limits: LimitsConfig,
    pub pacing: PacingConfig,
    pub broadcast: BroadcastConfig,
    pub session: SessionConfig,
}

impl From<&EngineConfig> for SessionSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            limits: config.limits.clone(),
            pacing: config.pacing.clone(),
            broadcast: config.broadcast.clone(),
            session: config.session.clone(),
        }
    }
}

/// Outcome of a stopped session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: Ulid,

    /// Items inserted into the buffer
    pub produced: u64,

    /// Items removed from the buffer
    pub consumed: u64,

    /// Items left in the buffer at stop
    pub buffered: u64,

    /// Workers that had to be aborted after the join timeout
    pub aborted: usize,

    /// Workers that panicked or were cancelled before they could be joined
    pub failed: usize,

    pub elapsed: Duration,
}

impl SessionReport {
    /// Every produced item is either consumed or still buffered
    pub fn is_conserved(&self) -> bool {
        self.produced == self.consumed + self.buffered
    }
}

/// One live simulation
pub struct SimulationSession {
    id: Ulid,
    config: SimulationConfig,
    buffer: Arc<BoundedBuffer<Item>>,
    producers: Vec<Arc<WorkerCell>>,
    consumers: Vec<Arc<WorkerCell>>,
    journal: Journal,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<WorkerSummary>>,
    broadcaster: Option<JoinHandle<BroadcastStats>>,
    join_timeout: Duration,
    started_at: Instant,
    running: bool,
}

impl SimulationSession {
    /// Validate `config` and spawn every worker plus the broadcaster
    ///
    /// Must be called from within a tokio runtime. Snapshots are delivered to
    /// `sink` until the session halts.
    pub fn start(
        config: SimulationConfig,
        settings: &SessionSettings,
        sink: SnapshotSink,
    ) -> Result<Self> {
        config.validate(&settings.limits)?;

        let id = Ulid::new();
        let (journal, journal_rx) = Journal::channel();
        let buffer = Arc::new(BoundedBuffer::with_observer(
            config.buffer_capacity,
            Arc::new(journal.clone()),
        ));

        journal.record(JournalEntry::Started {
            capacity: config.buffer_capacity,
            producers: config.producer_count,
            consumers: config.consumer_count,
        });
        let broadcaster = StateBroadcaster::new(settings.broadcast.clone(), sink).spawn(journal_rx);

        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            buffer: buffer.clone(),
            journal: journal.clone(),
            cancel: cancel.clone(),
            pacing: settings.pacing.clone(),
            items: Arc::new(ItemSequencer::new()),
        };

        let producers: Vec<_> = (1..=config.producer_count)
            .map(|id| Arc::new(WorkerCell::new(Role::Producer, id)))
            .collect();
        let consumers: Vec<_> = (1..=config.consumer_count)
            .map(|id| Arc::new(WorkerCell::new(Role::Consumer, id)))
            .collect();

        let workers = producers
            .iter()
            .chain(consumers.iter())
            .map(|cell| tokio::spawn(Worker::new(cell.clone(), ctx.clone()).run()))
            .collect();

        info!(
            "Session {} started: {} producers, {} consumers, capacity {}",
            id, config.producer_count, config.consumer_count, config.buffer_capacity
        );

        Ok(Self {
            id,
            config,
            buffer,
            producers,
            consumers,
            journal,
            cancel,
            workers,
            broadcaster: Some(broadcaster),
            join_timeout: settings.session.join_timeout(),
            started_at: Instant::now(),
            running: true,
        })
    }

    /// Stop every worker and flush the final snapshot
    ///
    /// Returns `None` if the session was already stopped.
    pub async fn stop(&mut self) -> Option<SessionReport> {
        if !self.running {
            return None;
        }
        self.running = false;

        debug!("Stopping session {}", self.id);
        self.cancel.cancel();
        self.buffer.close();

        let mut handles = std::mem::take(&mut self.workers);
        let joined = tokio::time::timeout(
            self.join_timeout,
            futures::future::join_all(handles.iter_mut()),
        )
        .await;

        let mut aborted = 0;
        let mut failed = 0;
        match joined {
            Ok(results) => {
                for e in results.into_iter().filter_map(|result| result.err()) {
                    let e = EngineError::WorkerJoin(e.to_string());
                    warn!("Session {}: {}", self.id, e);
                    failed += 1;
                }
            }
            Err(_) => {
                for handle in handles.iter().filter(|handle| !handle.is_finished()) {
                    handle.abort();
                    aborted += 1;
                }
                warn!(
                    "Session {}: {} workers missed the {:?} join timeout and were aborted",
                    self.id, aborted, self.join_timeout
                );
            }
        }

        // Aborted or panicked workers never reached Stopped on their own
        for cell in self.producers.iter().chain(self.consumers.iter()) {
            if cell.force_stop() {
                self.journal
                    .transition(cell.role(), cell.id(), WorkerState::Stopped);
            }
        }

        self.journal.record(JournalEntry::Halted);
        if let Some(broadcaster) = self.broadcaster.take() {
            match broadcaster.await {
                Ok(stats) => debug!("Session {} broadcaster: {:?}", self.id, stats),
                Err(e) => warn!("Session {} broadcaster failed: {}", self.id, e),
            }
        }

        let stats = self.buffer.stats();
        let report = SessionReport {
            session_id: self.id,
            produced: stats.total_put,
            consumed: stats.total_taken,
            buffered: stats.occupied as u64,
            aborted,
            failed,
            elapsed: self.started_at.elapsed(),
        };

        info!(
            "Session {} stopped after {:?}: produced {}, consumed {}, buffered {}",
            self.id, report.elapsed, report.produced, report.consumed, report.buffered
        );

        Some(report)
    }

    /// Current state read directly from the buffer and worker cells
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            seq: 0,
            capacity: self.buffer.capacity(),
            buffer: self.buffer.snapshot(),
            producers: self.producers.iter().map(|cell| cell.view()).collect(),
            consumers: self.consumers.iter().map(|cell| cell.view()).collect(),
            running: self.running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }
}

impl Drop for SimulationSession {
    fn drop(&mut self) {
        if self.running {
            warn!("Session {} dropped while running, cancelling", self.id);
            self.cancel.cancel();
            self.buffer.close();
            self.journal.record(JournalEntry::Halted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            pacing: PacingConfig {
                work_min_ms: 1,
                work_max_ms: 5,
                rest_min_ms: 0,
                rest_max_ms: 2,
            },
            broadcast: BroadcastConfig {
                flush_interval_ms: 0,
                heartbeat_ms: 0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation() {
        let limits = LimitsConfig::default();

        assert!(SimulationConfig::new(1, 1, 1).validate(&limits).is_ok());
        assert!(SimulationConfig::new(64, 64, 1024).validate(&limits).is_ok());

        for bad in [
            SimulationConfig::new(0, 1, 1),
            SimulationConfig::new(1, 0, 1),
            SimulationConfig::new(1, 1, 0),
            SimulationConfig::new(65, 1, 1),
            SimulationConfig::new(1, 1, 1025),
        ] {
            assert!(matches!(
                bad.validate(&limits),
                Err(EngineError::Configuration(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_invalid_config_spawns_nothing() {
        let (sink, mut snapshots) = mpsc::unbounded_channel();
        let result = SimulationSession::start(SimulationConfig::new(0, 2, 4), &fast_settings(), sink);

        assert!(matches!(result, Err(EngineError::Configuration(_))));
        assert!(snapshots.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_is_conserving_and_final() {
        let (sink, mut snapshots) = mpsc::unbounded_channel();
        let mut session =
            SimulationSession::start(SimulationConfig::new(3, 3, 8), &fast_settings(), sink).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = session.stop().await.unwrap();

        assert!(report.is_conserved());
        assert_eq!(report.aborted, 0);
        assert_eq!(report.failed, 0);
        assert!(report.produced > 0);
        assert!(!session.is_running());
        assert!(session.stop().await.is_none());

        let view = session.snapshot();
        assert!(view.all_stopped());
        assert_eq!(view.producers.len(), 3);
        assert_eq!(view.consumers.len(), 3);

        drop(session);
        let mut delivered = vec![];
        while let Some(snapshot) = snapshots.recv().await {
            delivered.push(snapshot);
        }

        assert!(delivered.first().unwrap().running);
        let last = delivered.last().unwrap();
        assert!(!last.running);
        assert!(last.all_stopped());
        assert_eq!(last.occupied() as u64, report.buffered);
        assert!(delivered.iter().all(|s| s.occupied() <= s.capacity));
        assert!(delivered.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_small_buffer_shows_both_blocked_states() {
        let (sink, mut snapshots) = mpsc::unbounded_channel();
        let mut session =
            SimulationSession::start(SimulationConfig::new(2, 2, 1), &fast_settings(), sink).unwrap();

        let mut saw_put_blocked = false;
        let mut saw_take_blocked = false;
        let deadline = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(deadline);

        while !(saw_put_blocked && saw_take_blocked) {
            tokio::select! {
                _ = &mut deadline => break,
                Some(snapshot) = snapshots.recv() => {
                    assert!(snapshot.occupied() <= 1);
                    saw_put_blocked |= snapshot.any_in_state(WorkerState::BlockedPuttingItem);
                    saw_take_blocked |= snapshot.any_in_state(WorkerState::BlockedWaitingForItem);
                }
            }
        }

        let report = session.stop().await.unwrap();
        assert!(saw_put_blocked, "no producer was seen blocked");
        assert!(saw_take_blocked, "no consumer was seen blocked");
        assert!(report.is_conserved());
    }

    #[tokio::test]
    async fn test_accessor_snapshot_reflects_buffer() {
        let settings = SessionSettings {
            pacing: PacingConfig::fixed(60_000, 0),
            ..fast_settings()
        };
        let (sink, _snapshots) = mpsc::unbounded_channel();
        let mut session = SimulationSession::start(SimulationConfig::new(1, 1, 4), &settings, sink).unwrap();

        let view = session.snapshot();
        assert!(view.running);
        assert_eq!(view.capacity, 4);
        assert!(view.buffer.is_empty());
        assert_eq!(view.seq, 0);

        let report = session.stop().await.unwrap();
        assert_eq!(report.produced, 0);
        assert_eq!(session.stats().total_put, 0);
        assert!(session.stats().closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lost_worker_is_reported_and_forced_stopped() {
        let settings = SessionSettings {
            pacing: PacingConfig::fixed(60_000, 0),
            ..fast_settings()
        };
        let (sink, mut snapshots) = mpsc::unbounded_channel();
        let mut session = SimulationSession::start(SimulationConfig::new(2, 1, 4), &settings, sink).unwrap();

        // The first producer dies without reaching Stopped itself
        session.workers[0].abort();
        let report = session.stop().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.aborted, 0);
        assert!(report.is_conserved());

        drop(session);
        let mut last = None;
        while let Some(snapshot) = snapshots.recv().await {
            last = Some(snapshot);
        }
        let last = last.unwrap();
        assert!(!last.running);
        assert!(last.all_stopped());
    }
}
