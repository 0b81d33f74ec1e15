// packages/engine/src/broadcast/snapshot.rs
//! Immutable point-in-time view of a session

use crate::runtime::worker::WorkerState;
use crate::runtime::Item;
use serde::{Deserialize, Serialize};

/// One worker as seen by viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: usize,
    pub state: WorkerState,
}

/// Snapshot of buffer contents and worker states
///
/// Built fresh for every delivery and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Delivery sequence within a session (0 for accessor snapshots)
    pub seq: u64,

    /// Number of buffer slots
    pub capacity: usize,

    /// Occupied slots only, oldest first
    pub buffer: Vec<Item>,

    pub producers: Vec<WorkerView>,

    pub consumers: Vec<WorkerView>,

    pub running: bool,
}

impl StateSnapshot {
    /// Snapshot of a controller with no session
    pub fn idle() -> Self {
        Self {
            seq: 0,
            capacity: 0,
            buffer: vec![],
            producers: vec![],
            consumers: vec![],
            running: false,
        }
    }

    pub fn occupied(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.buffer.len() == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// All workers, producers first
    pub fn workers(&self) -> impl Iterator<Item = &WorkerView> + '_ {
        self.producers.iter().chain(self.consumers.iter())
    }

    /// Whether any worker is currently in `state`
    pub fn any_in_state(&self, state: WorkerState) -> bool {
        self.workers().any(|worker| worker.state == state)
    }

    pub fn all_stopped(&self) -> bool {
        self.workers().all(|worker| worker.state == WorkerState::Stopped)
    }
}
