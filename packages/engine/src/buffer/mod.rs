// packages/engine/src/buffer/mod.rs
//! Fixed-capacity FIFO buffer shared by producers and consumers
//!
//! # Architecture
//!
//! ```text
//!          put ─┐                                ┌─ take
//!               ▼                                ▼
//!   ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┬──────┐
//!   │  ·   │  17  │  18  │  21  │  ·   │  ·   │  ·   │  ·   │
//!   └──────┴──────┴──────┴──────┴──────┴──────┴──────┴──────┘
//!            head ──────────────▶ tail      (ring, one mutex)
//!
//!   not_full  (Notify) ◀── take wakes one putter
//!   not_empty (Notify) ◀── put wakes one taker
//! ```
//!
//! The slot ring is guarded by a single `parking_lot::Mutex` that is never
//! held across an `.await`. Blocked callers park on a `tokio::sync::Notify`
//! and re-check the ring when woken. `close()` wakes every waiter with
//! [`Cancelled`].

pub mod bounded;

pub use bounded::{
    BoundedBuffer, BufferSlot, BufferStats, Cancelled, PutAttempt, TakeAttempt,
};

/// Hook invoked while the buffer lock is held, once per mutation
///
/// Implementations must be cheap and must not block or perform I/O: they run
/// inside the buffer's critical section, which is what makes the order of
/// callbacks identical to the order of mutations.
pub trait BufferObserver<T>: Send + Sync {
    /// An item was inserted at the tail
    fn on_put(&self, item: &T);

    /// An item was removed from the head
    fn on_take(&self, item: &T);
}
