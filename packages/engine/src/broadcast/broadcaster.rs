// packages/engine/src/broadcast/broadcaster.rs
//! Journal-driven snapshot broadcaster
//!
//! Keeps a replica of the session built purely from journal entries and turns
//! it into [`StateSnapshot`]s for the owning controller.
//!
//! # Coalescing
//!
//! The first entry after a quiet period is delivered at once. The broadcaster
//! then sleeps for `flush_interval` and drains whatever queued up meanwhile.
//! Within a drained batch a snapshot is emitted every time the significance
//! key changes:
//!
//! - buffer fill class (empty / partial / full)
//! - a worker blocking, unblocking or stopping
//! - the running flag
//!
//! and once more at the end of the batch if anything else changed. Rapid
//! `producing → idle → producing` churn collapses into one snapshot, but a
//! buffer can never appear to jump from empty to full.

use crate::broadcast::journal::JournalEntry;
use crate::broadcast::snapshot::{StateSnapshot, WorkerView};
use crate::runtime::worker::{Role, WorkerState};
use crate::runtime::Item;
use crate::utils::config::BroadcastConfig;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Where snapshots are delivered
pub type SnapshotSink = mpsc::UnboundedSender<StateSnapshot>;

/// Broadcaster statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Journal entries applied to the replica
    pub entries_applied: u64,

    /// Snapshots handed to the sink
    pub snapshots_emitted: u64,

    /// Entries folded into a later snapshot
    pub entries_coalesced: u64,

    /// Snapshots re-sent after a quiet heartbeat period
    pub heartbeats: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    Empty,
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Blocked,
    Stopped,
}

impl From<WorkerState> for Phase {
    fn from(state: WorkerState) -> Self {
        if state.is_blocked() {
            Phase::Blocked
        } else if state == WorkerState::Stopped {
            Phase::Stopped
        } else {
            Phase::Active
        }
    }
}

/// States that must each be visible in at least one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignificanceKey {
    fill: Fill,
    phases: Vec<Phase>,
    running: bool,
}

/// Session state rebuilt from the journal
#[derive(Debug, Default)]
struct Replica {
    capacity: usize,
    buffer: VecDeque<Item>,
    producers: Vec<WorkerState>,
    consumers: Vec<WorkerState>,
    running: bool,
}

impl Replica {
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Started {
                capacity,
                producers,
                consumers,
            } => {
                *self = Replica {
                    capacity,
                    buffer: VecDeque::with_capacity(capacity),
                    producers: vec![WorkerState::Idle; producers],
                    consumers: vec![WorkerState::Idle; consumers],
                    running: true,
                };
            }
            JournalEntry::Transition { role, id, state } => {
                let workers = match role {
                    Role::Producer => &mut self.producers,
                    Role::Consumer => &mut self.consumers,
                };
                match id.checked_sub(1).and_then(|index| workers.get_mut(index)) {
                    Some(slot) => *slot = state,
                    None => warn!("Journal transition for unknown {} {}", role, id),
                }
            }
            JournalEntry::Put(item) => self.buffer.push_back(item),
            JournalEntry::Taken(item) => {
                if self.buffer.front() == Some(&item) {
                    self.buffer.pop_front();
                } else if let Some(position) = self.buffer.iter().position(|held| *held == item) {
                    warn!("Item {} taken out of FIFO order", item);
                    self.buffer.remove(position);
                } else {
                    warn!("Journal removal of unknown item {}", item);
                }
            }
            JournalEntry::Halted => {
                self.running = false;
                for state in self.producers.iter_mut().chain(self.consumers.iter_mut()) {
                    *state = WorkerState::Stopped;
                }
            }
        }
    }

    fn key(&self) -> SignificanceKey {
        let fill = if self.buffer.is_empty() {
            Fill::Empty
        } else if self.buffer.len() >= self.capacity {
            Fill::Full
        } else {
            Fill::Partial
        };

        SignificanceKey {
            fill,
            phases: self
                .producers
                .iter()
                .chain(self.consumers.iter())
                .map(|state| Phase::from(*state))
                .collect(),
            running: self.running,
        }
    }

    fn materialize(&self, seq: u64) -> StateSnapshot {
        let views = |states: &[WorkerState]| {
            states
                .iter()
                .enumerate()
                .map(|(index, state)| WorkerView {
                    id: index + 1,
                    state: *state,
                })
                .collect()
        };

        StateSnapshot {
            seq,
            capacity: self.capacity,
            buffer: self.buffer.iter().copied().collect(),
            producers: views(&self.producers),
            consumers: views(&self.consumers),
            running: self.running,
        }
    }
}

/// Turns journal entries into snapshots
pub struct StateBroadcaster {
    config: BroadcastConfig,
    sink: SnapshotSink,
    replica: Replica,
    last_key: Option<SignificanceKey>,
    dirty: bool,
    seq: u64,
    stats: BroadcastStats,
}

impl StateBroadcaster {
    /// Create a broadcaster delivering to `sink`
    pub fn new(config: BroadcastConfig, sink: SnapshotSink) -> Self {
        Self {
            config,
            sink,
            replica: Replica::default(),
            last_key: None,
            dirty: false,
            seq: 0,
            stats: BroadcastStats::default(),
        }
    }

    /// Run on a background task until the journal halts or closes
    pub fn spawn(self, journal: mpsc::UnboundedReceiver<JournalEntry>) -> JoinHandle<BroadcastStats> {
        tokio::spawn(self.run(journal))
    }

    /// Consume the journal until `Halted` (or until every writer is gone)
    pub async fn run(mut self, mut journal: mpsc::UnboundedReceiver<JournalEntry>) -> BroadcastStats {
        let flush_interval = self.config.flush_interval();

        loop {
            let next = match self.config.heartbeat() {
                Some(heartbeat) if self.replica.running => {
                    match tokio::time::timeout(heartbeat, journal.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            trace!("Journal quiet, re-sending latest snapshot");
                            self.stats.heartbeats += 1;
                            self.emit();
                            continue;
                        }
                    }
                }
                _ => journal.recv().await,
            };

            let Some(entry) = next else {
                break;
            };
            if self.absorb(entry) {
                return self.finish();
            }

            if !flush_interval.is_zero() {
                tokio::time::sleep(flush_interval).await;
            }

            // Drain the burst
            while let Ok(entry) = journal.try_recv() {
                if self.absorb(entry) {
                    return self.finish();
                }
            }

            if self.dirty {
                self.emit();
            }
        }

        // Every writer dropped without a Halted entry
        if self.dirty {
            self.emit();
        }
        self.finish()
    }

    /// Apply one entry; returns `true` once the session has halted
    fn absorb(&mut self, entry: JournalEntry) -> bool {
        let halted = entry == JournalEntry::Halted;
        trace!("Journal entry: {:?}", entry);

        self.replica.apply(entry);
        self.stats.entries_applied += 1;

        if self.last_key.as_ref() != Some(&self.replica.key()) {
            self.emit();
        } else {
            self.dirty = true;
            self.stats.entries_coalesced += 1;
        }

        halted
    }

    fn emit(&mut self) {
        self.seq += 1;
        let snapshot = self.replica.materialize(self.seq);

        self.last_key = Some(self.replica.key());
        self.dirty = false;
        self.stats.snapshots_emitted += 1;

        if self.sink.send(snapshot).is_err() {
            trace!("Snapshot sink closed");
        }
    }

    fn finish(self) -> BroadcastStats {
        debug!(
            "Broadcaster finished: {} entries, {} snapshots, {} coalesced",
            self.stats.entries_applied, self.stats.snapshots_emitted, self.stats.entries_coalesced
        );
        self.stats
    }
}
