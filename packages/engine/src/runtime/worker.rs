// packages/engine/src/runtime/worker.rs
//! Producer and consumer workers
//!
//! Each worker is a tokio task driving an explicit state machine:
//!
//! ```text
//! Producer:  Idle ──▶ Producing ──▶ BlockedPuttingItem ──▶ Idle
//!                         │                                  ▲
//!                         └──────── (slot free) ─────────────┘
//!
//! Consumer:  Idle ──▶ BlockedWaitingForItem ──▶ Consuming ──▶ Idle
//!              │                                   ▲
//!              └──────── (item ready) ─────────────┘
//!
//! Any state ──▶ Stopped (terminal)
//! ```
//!
//! Every accepted transition is written to the worker's [`WorkerCell`] and
//! appended to the session journal.

use crate::broadcast::journal::Journal;
use crate::broadcast::snapshot::WorkerView;
use crate::buffer::{BoundedBuffer, PutAttempt, TakeAttempt};
use crate::observability::metrics;
use crate::runtime::Item;
use crate::utils::config::PacingConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Worker role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Producing,
    BlockedPuttingItem,
    BlockedWaitingForItem,
    Consuming,
    Stopped,
}

impl WorkerState {
    /// Whether `role` may move from `self` to `next`
    pub fn can_transition(self, role: Role, next: WorkerState) -> bool {
        use WorkerState::*;

        if self == Stopped {
            return false;
        }
        if next == Stopped {
            return true;
        }

        match role {
            Role::Producer => matches!(
                (self, next),
                (Idle, Producing)
                    | (Producing, BlockedPuttingItem)
                    | (Producing, Idle)
                    | (BlockedPuttingItem, Idle)
            ),
            Role::Consumer => matches!(
                (self, next),
                (Idle, BlockedWaitingForItem)
                    | (Idle, Consuming)
                    | (BlockedWaitingForItem, Consuming)
                    | (Consuming, Idle)
            ),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            WorkerState::BlockedPuttingItem | WorkerState::BlockedWaitingForItem
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Producing => "producing",
            WorkerState::BlockedPuttingItem => "blocked_putting_item",
            WorkerState::BlockedWaitingForItem => "blocked_waiting_for_item",
            WorkerState::Consuming => "consuming",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition outside the role's state table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{role} {id} cannot move from {from} to {to}")]
pub struct IllegalTransition {
    pub role: Role,
    pub id: usize,
    pub from: WorkerState,
    pub to: WorkerState,
}

/// Current state of one worker, shared with its session
#[derive(Debug)]
pub struct WorkerCell {
    role: Role,
    id: usize,
    state: Mutex<WorkerState>,
}

impl WorkerCell {
    pub fn new(role: Role, id: usize) -> Self {
        Self {
            role,
            id,
            state: Mutex::new(WorkerState::Idle),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 1-based id within the role
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn view(&self) -> WorkerView {
        WorkerView {
            id: self.id,
            state: self.state(),
        }
    }

    /// Move to `next`, returning the previous state
    pub fn advance(&self, next: WorkerState) -> Result<WorkerState, IllegalTransition> {
        let mut state = self.state.lock();
        let from = *state;

        if !from.can_transition(self.role, next) {
            return Err(IllegalTransition {
                role: self.role,
                id: self.id,
                from,
                to: next,
            });
        }

        *state = next;
        Ok(from)
    }

    /// Mark a worker that never reached `Stopped` itself; `false` if it had
    pub fn force_stop(&self) -> bool {
        let mut state = self.state.lock();
        if *state == WorkerState::Stopped {
            return false;
        }
        *state = WorkerState::Stopped;
        true
    }
}

/// Session-wide source of distinct items
#[derive(Debug)]
pub struct ItemSequencer {
    next: AtomicU64,
}

impl ItemSequencer {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_item(&self) -> Item {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ItemSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a worker shares with the rest of its session
#[derive(Clone)]
pub struct WorkerContext {
    pub buffer: Arc<BoundedBuffer<Item>>,
    pub journal: Journal,
    pub cancel: CancellationToken,
    pub pacing: PacingConfig,
    pub items: Arc<ItemSequencer>,
}

/// What a worker did before it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub role: Role,
    pub id: usize,

    /// Items put (producer) or taken (consumer)
    pub items: u64,
}

/// One producer or consumer
pub struct Worker {
    cell: Arc<WorkerCell>,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(cell: Arc<WorkerCell>, ctx: WorkerContext) -> Self {
        Self { cell, ctx }
    }

    /// Run until cancelled; always ends in `Stopped`
    pub async fn run(self) -> WorkerSummary {
        let role = self.cell.role();
        let id = self.cell.id();
        debug!("{} {} started", role, id);

        let items = match role {
            Role::Producer => self.produce().await,
            Role::Consumer => self.consume().await,
        };

        self.enter(WorkerState::Stopped);
        debug!("{} {} stopped after {} items", role, id, items);

        WorkerSummary { role, id, items }
    }

    async fn produce(&self) -> u64 {
        let mut produced = 0;

        loop {
            self.enter(WorkerState::Producing);
            if !self.pause(self.ctx.pacing.sample_work()).await {
                break;
            }

            if self.ctx.cancel.is_cancelled() {
                break;
            }

            let item = self.ctx.items.next_item();
            match self.ctx.buffer.try_put(item) {
                PutAttempt::Accepted => {}
                PutAttempt::Full(item) => {
                    self.enter(WorkerState::BlockedPuttingItem);
                    metrics::worker_blocked(Role::Producer);
                    if self.ctx.buffer.put(item).await.is_err() {
                        break;
                    }
                }
                PutAttempt::Cancelled(_) => break,
            }

            produced += 1;
            metrics::item_produced();
            debug!("Producer {} put item {}", self.cell.id(), item);

            self.enter(WorkerState::Idle);
            if !self.pause(self.ctx.pacing.sample_rest()).await {
                break;
            }
        }

        produced
    }

    async fn consume(&self) -> u64 {
        let mut consumed = 0;

        loop {
            if self.ctx.cancel.is_cancelled() {
                break;
            }

            let item = match self.ctx.buffer.try_take() {
                TakeAttempt::Taken(item) => item,
                TakeAttempt::Empty => {
                    self.enter(WorkerState::BlockedWaitingForItem);
                    metrics::worker_blocked(Role::Consumer);
                    match self.ctx.buffer.take().await {
                        Ok(item) => item,
                        Err(_) => break,
                    }
                }
                TakeAttempt::Cancelled => break,
            };

            consumed += 1;
            metrics::item_consumed();
            debug!("Consumer {} took item {}", self.cell.id(), item);

            self.enter(WorkerState::Consuming);
            if !self.pause(self.ctx.pacing.sample_work()).await {
                break;
            }

            self.enter(WorkerState::Idle);
            if !self.pause(self.ctx.pacing.sample_rest()).await {
                break;
            }
        }

        consumed
    }

    fn enter(&self, next: WorkerState) {
        match self.cell.advance(next) {
            Ok(_) => self.ctx.journal.transition(self.cell.role(), self.cell.id(), next),
            Err(e) => warn!("Rejected worker transition: {}", e),
        }
    }

    /// Sleep unless cancelled first; `false` means stop
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return !self.ctx.cancel.is_cancelled();
        }

        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
