// packages/engine/src/broadcast/journal.rs
//! Ordered journal of session state changes

use crate::buffer::BufferObserver;
use crate::runtime::worker::{Role, WorkerState};
use crate::runtime::Item;
use tokio::sync::mpsc;
use tracing::trace;

/// One state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Session created; all workers start `Idle`, buffer empty
    Started {
        capacity: usize,
        producers: usize,
        consumers: usize,
    },

    /// Worker `id` (1-based) of `role` entered `state`
    Transition {
        role: Role,
        id: usize,
        state: WorkerState,
    },

    /// Item inserted at the tail
    Put(Item),

    /// Item removed from the head
    Taken(Item),

    /// Session stopped; nothing follows
    Halted,
}

/// Cloneable journal writer
#[derive(Debug, Clone)]
pub struct Journal {
    tx: mpsc::UnboundedSender<JournalEntry>,
}

impl Journal {
    /// Create a journal and its reading end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JournalEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Append an entry; silently dropped once the reader is gone
    pub fn record(&self, entry: JournalEntry) {
        if self.tx.send(entry).is_err() {
            trace!("Journal reader gone, entry dropped");
        }
    }

    pub fn transition(&self, role: Role, id: usize, state: WorkerState) {
        self.record(JournalEntry::Transition { role, id, state });
    }
}

impl BufferObserver<Item> for Journal {
    fn on_put(&self, item: &Item) {
        self.record(JournalEntry::Put(*item));
    }

    fn on_take(&self, item: &Item) {
        self.record(JournalEntry::Taken(*item));
    }
}
