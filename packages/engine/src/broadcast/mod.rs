// packages/engine/src/broadcast/mod.rs
//! State broadcasting
//!
//! - **Journal**: ordered stream of state changes (worker transitions, buffer
//!   insertions/removals, session start/halt)
//! - **Snapshot**: immutable projection delivered to viewers
//! - **Broadcaster**: replays the journal, coalesces bursts and emits snapshots
//!
//! # Architecture
//!
//! ```text
//! Worker ──transition──┐
//!                      ├──▶ Journal (unbounded) ──▶ StateBroadcaster ──▶ SnapshotSink
//! Buffer ──put/take────┘      (ordered)            replica + coalescing    (controller)
//!   (under buffer lock)
//! ```
//!
//! Buffer entries are journaled inside the buffer's critical section, so the
//! replica passes through every buffer state in the order it really
//! happened. The broadcaster never touches the buffer and performs no I/O.

pub mod broadcaster;
pub mod journal;
pub mod snapshot;

pub use broadcaster::{BroadcastStats, SnapshotSink, StateBroadcaster};
pub use journal::{Journal, JournalEntry};
pub use snapshot::{StateSnapshot, WorkerView};
