// packages/engine/src/buffer/bounded.rs
//! Bounded blocking buffer
//!
//! Non-blocking `try_put`/`try_take`, suspending `put`/`take`, a point-in-time
//! `snapshot()` of occupied slots, and `close()` for cancellation.

use crate::buffer::BufferObserver;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::trace;

/// Returned by blocking operations once the buffer has been closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer operation cancelled")]
pub struct Cancelled;

/// Outcome of a non-blocking insertion
#[derive(Debug, PartialEq, Eq)]
pub enum PutAttempt<T> {
    Accepted,
    /// No free slot; the item is handed back
    Full(T),
    /// The buffer is closed; the item is handed back
    Cancelled(T),
}

/// Outcome of a non-blocking removal
#[derive(Debug, PartialEq, Eq)]
pub enum TakeAttempt<T> {
    Taken(T),
    Empty,
    Cancelled,
}

/// One physical slot of the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferSlot<T> {
    Empty,
    Occupied(T),
}

impl<T> BufferSlot<T> {
    pub fn is_occupied(&self) -> bool {
        matches!(self, BufferSlot::Occupied(_))
    }
}

/// Buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Number of slots
    pub capacity: usize,

    /// Slots currently occupied
    pub occupied: usize,

    /// Items ever inserted
    pub total_put: u64,

    /// Items ever removed
    pub total_taken: u64,

    /// Whether `close()` has been called
    pub closed: bool,
}

/// Slot ring; insertion and removal points advance independently
struct Ring<T> {
    slots: Vec<BufferSlot<T>>,
    head: usize,
    len: usize,
    total_put: u64,
    total_taken: u64,
    closed: bool,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| BufferSlot::Empty).collect(),
            head: 0,
            len: 0,
            total_put: 0,
            total_taken: 0,
            closed: false,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Caller must have checked `is_full()`
    fn push(&mut self, item: T) {
        let tail = (self.head + self.len) % self.capacity();
        debug_assert!(!self.slots[tail].is_occupied());
        self.slots[tail] = BufferSlot::Occupied(item);
        self.len += 1;
        self.total_put += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let slot = std::mem::replace(&mut self.slots[self.head], BufferSlot::Empty);
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        self.total_taken += 1;
        match slot {
            BufferSlot::Occupied(item) => Some(item),
            BufferSlot::Empty => None,
        }
    }

    /// Occupied slots from head to tail
    fn occupied(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |offset| {
            match &self.slots[(self.head + offset) % self.capacity()] {
                BufferSlot::Occupied(item) => Some(item),
                BufferSlot::Empty => None,
            }
        })
    }
}

/// Fixed-capacity FIFO buffer with blocking put/take
pub struct BoundedBuffer<T> {
    ring: Mutex<Ring<T>>,
    not_full: Notify,
    not_empty: Notify,
    observer: Option<Arc<dyn BufferObserver<T>>>,
}

impl<T> BoundedBuffer<T> {
    /// Create a buffer with `capacity` slots
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            ring: Mutex::new(Ring::new(capacity)),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            observer: None,
        }
    }

    /// Create a buffer whose mutations are reported to `observer`
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_observer(capacity: usize, observer: Arc<dyn BufferObserver<T>>) -> Self {
        Self {
            observer: Some(observer),
            ..Self::new(capacity)
        }
    }

    /// Insert without waiting
    pub fn try_put(&self, item: T) -> PutAttempt<T> {
        let mut ring = self.ring.lock();
        if ring.closed {
            return PutAttempt::Cancelled(item);
        }
        if ring.is_full() {
            return PutAttempt::Full(item);
        }

        if let Some(observer) = &self.observer {
            observer.on_put(&item);
        }
        ring.push(item);
        drop(ring);

        self.not_empty.notify_one();
        PutAttempt::Accepted
    }

    /// Remove the oldest item without waiting
    pub fn try_take(&self) -> TakeAttempt<T> {
        let mut ring = self.ring.lock();
        if ring.closed {
            return TakeAttempt::Cancelled;
        }

        let Some(item) = ring.pop() else {
            return TakeAttempt::Empty;
        };
        if let Some(observer) = &self.observer {
            observer.on_take(&item);
        }
        drop(ring);

        self.not_full.notify_one();
        TakeAttempt::Taken(item)
    }

    /// Insert, suspending while the buffer is full
    pub async fn put(&self, mut item: T) -> Result<(), Cancelled> {
        loop {
            // Register interest before checking, so a take between the check
            // and the await is not missed.
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_put(item) {
                PutAttempt::Accepted => return Ok(()),
                PutAttempt::Cancelled(_) => return Err(Cancelled),
                PutAttempt::Full(back) => item = back,
            }

            trace!("put waiting for a free slot");
            notified.await;
        }
    }

    /// Remove the oldest item, suspending while the buffer is empty
    pub async fn take(&self) -> Result<T, Cancelled> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take() {
                TakeAttempt::Taken(item) => return Ok(item),
                TakeAttempt::Cancelled => return Err(Cancelled),
                TakeAttempt::Empty => {}
            }

            trace!("take waiting for an item");
            notified.await;
        }
    }

    /// Cancel every pending and future operation
    ///
    /// Returns `false` if the buffer was already closed. Items still in the
    /// buffer stay readable through `snapshot()`.
    pub fn close(&self) -> bool {
        let newly_closed = {
            let mut ring = self.ring.lock();
            !std::mem::replace(&mut ring.closed, true)
        };

        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
        newly_closed
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }

    /// Get buffer statistics
    pub fn stats(&self) -> BufferStats {
        let ring = self.ring.lock();
        BufferStats {
            capacity: ring.capacity(),
            occupied: ring.len,
            total_put: ring.total_put,
            total_taken: ring.total_taken,
            closed: ring.closed,
        }
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// Occupied items in FIFO order
    pub fn snapshot(&self) -> Vec<T> {
        self.ring.lock().occupied().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_try_put_until_full() {
        let buffer = BoundedBuffer::new(2);

        assert_eq!(buffer.try_put(1), PutAttempt::Accepted);
        assert_eq!(buffer.try_put(2), PutAttempt::Accepted);
        assert!(buffer.is_full());
        assert_eq!(buffer.try_put(3), PutAttempt::Full(3));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_try_take_empty() {
        let buffer: BoundedBuffer<u64> = BoundedBuffer::new(1);
        assert_eq!(buffer.try_take(), TakeAttempt::Empty);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fifo_across_wraparound() {
        let buffer = BoundedBuffer::new(3);

        for round in 0..5u64 {
            buffer.try_put(round * 10);
            buffer.try_put(round * 10 + 1);
            assert_eq!(buffer.try_take(), TakeAttempt::Taken(round * 10));
            assert_eq!(buffer.try_take(), TakeAttempt::Taken(round * 10 + 1));
        }

        assert!(buffer.is_empty());
    }

    #[test]
    fn test_snapshot_is_fifo_ordered() {
        let buffer = BoundedBuffer::new(4);
        for item in [7, 8, 9, 10] {
            buffer.try_put(item);
        }
        buffer.try_take();
        buffer.try_take();
        buffer.try_put(11);

        // Physically the ring now holds [11, _, 9, 10]
        assert_eq!(buffer.snapshot(), vec![9, 10, 11]);
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn test_zero_capacity_panics() {
        let _ = BoundedBuffer::<u64>::new(0);
    }

    #[test]
    fn test_stats() {
        let buffer = BoundedBuffer::new(4);
        buffer.try_put(1);
        buffer.try_put(2);
        buffer.try_take();

        let stats = buffer.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.occupied, 1);
        assert_eq!(stats.total_put, 2);
        assert_eq!(stats.total_taken, 1);
        assert!(!stats.closed);
    }

    #[test]
    fn test_operations_after_close() {
        let buffer = BoundedBuffer::new(2);
        buffer.try_put(1);

        assert!(buffer.close());
        assert!(!buffer.close());

        assert_eq!(buffer.try_put(2), PutAttempt::Cancelled(2));
        assert_eq!(buffer.try_take(), TakeAttempt::Cancelled);
        // Remaining items are still visible
        assert_eq!(buffer.snapshot(), vec![1]);
    }

    #[tokio::test]
    async fn test_take_waits_for_put() {
        let buffer = Arc::new(BoundedBuffer::new(1));

        let taker = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.take().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!taker.is_finished());

        buffer.put(42).await.unwrap();
        let taken = timeout(WAIT, taker).await.unwrap().unwrap();
        assert_eq!(taken, Ok(42));
    }

    #[tokio::test]
    async fn test_put_waits_for_take() {
        let buffer = Arc::new(BoundedBuffer::new(1));
        buffer.put(1).await.unwrap();

        let putter = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.put(2).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!putter.is_finished());

        assert_eq!(buffer.take().await, Ok(1));
        timeout(WAIT, putter).await.unwrap().unwrap().unwrap();
        assert_eq!(buffer.snapshot(), vec![2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_unblocks_all_waiters() {
        let full = Arc::new(BoundedBuffer::new(1));
        full.try_put(0u64);
        let empty: Arc<BoundedBuffer<u64>> = Arc::new(BoundedBuffer::new(1));

        let mut handles = vec![];
        for i in 0..3u64 {
            let full = Arc::clone(&full);
            handles.push(tokio::spawn(async move { full.put(i).await }));
        }
        let mut takers = vec![];
        for _ in 0..3 {
            let empty = Arc::clone(&empty);
            takers.push(tokio::spawn(async move { empty.take().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        full.close();
        empty.close();

        for handle in handles {
            let result = timeout(WAIT, handle).await.unwrap().unwrap();
            assert_eq!(result, Err(Cancelled));
        }
        for handle in takers {
            let result = timeout(WAIT, handle).await.unwrap().unwrap();
            assert_eq!(result, Err(Cancelled));
        }
        assert_eq!(full.snapshot(), vec![0]);
    }

    struct Recording(Mutex<Vec<(char, u64)>>);

    impl BufferObserver<u64> for Recording {
        fn on_put(&self, item: &u64) {
            self.0.lock().push(('+', *item));
        }

        fn on_take(&self, item: &u64) {
            self.0.lock().push(('-', *item));
        }
    }

    #[test]
    fn test_observer_sees_mutations_in_order() {
        let recording = Arc::new(Recording(Mutex::new(vec![])));
        let buffer = BoundedBuffer::with_observer(2, recording.clone());

        buffer.try_put(1);
        buffer.try_put(2);
        buffer.try_put(3); // full, not observed
        buffer.try_take();
        buffer.try_put(4);

        assert_eq!(
            *recording.0.lock(),
            vec![('+', 1), ('+', 2), ('-', 1), ('+', 4)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_and_consumers() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 500;

        let buffer = Arc::new(BoundedBuffer::new(3));

        let mut producers = vec![];
        for p in 0..PRODUCERS {
            let buffer = Arc::clone(&buffer);
            producers.push(tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    buffer.put(p * PER_PRODUCER + i).await.unwrap();
                }
            }));
        }

        let mut consumers = vec![];
        for _ in 0..4 {
            let buffer = Arc::clone(&buffer);
            consumers.push(tokio::spawn(async move {
                let mut seen = vec![];
                while let Ok(item) = buffer.take().await {
                    assert!(buffer.len() <= 3);
                    seen.push(item);
                }
                seen
            }));
        }

        for handle in producers {
            timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
        }
        // Let consumers drain, then cancel them
        while !buffer.is_empty() {
            tokio::task::yield_now().await;
        }
        buffer.close();

        let mut all = HashSet::new();
        let mut total = 0;
        for handle in consumers {
            let seen = timeout(WAIT, handle).await.unwrap().unwrap();
            // Each consumer sees each producer's items in insertion order
            for p in 0..PRODUCERS {
                let own: Vec<_> = seen
                    .iter()
                    .filter(|item| **item / PER_PRODUCER == p)
                    .collect();
                assert!(own.windows(2).all(|w| w[0] < w[1]));
            }
            total += seen.len();
            all.extend(seen);
        }

        assert_eq!(total as u64, PRODUCERS * PER_PRODUCER);
        assert_eq!(all.len() as u64, PRODUCERS * PER_PRODUCER);

        let stats = buffer.stats();
        assert_eq!(stats.total_put, stats.total_taken + stats.occupied as u64);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8),
        Take,
    }

    fn op_strategy() -> impl proptest::strategy::Strategy<Value = Op> {
        use proptest::prelude::*;
        prop_oneof![any::<u8>().prop_map(Op::Put), Just(Op::Take)]
    }

    proptest::proptest! {
        #[test]
        fn prop_matches_queue_model(
            capacity in 1usize..8,
            ops in proptest::collection::vec(op_strategy(), 0..64),
        ) {
            let buffer = BoundedBuffer::new(capacity);
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Put(item) => {
                        let outcome = buffer.try_put(item);
                        if model.len() < capacity {
                            model.push_back(item);
                            proptest::prop_assert_eq!(outcome, PutAttempt::Accepted);
                        } else {
                            proptest::prop_assert_eq!(outcome, PutAttempt::Full(item));
                        }
                    }
                    Op::Take => {
                        let expected = match model.pop_front() {
                            Some(item) => TakeAttempt::Taken(item),
                            None => TakeAttempt::Empty,
                        };
                        proptest::prop_assert_eq!(buffer.try_take(), expected);
                    }
                }
                proptest::prop_assert!(buffer.len() <= capacity);
                proptest::prop_assert_eq!(buffer.snapshot(), model.iter().copied().collect::<Vec<_>>());
            }
        }
    }
}
