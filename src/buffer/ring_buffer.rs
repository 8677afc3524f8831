//! Fixed-capacity ring with optional collapse-to-latest reads
//!
//! ```text
//! write() ──► [ slot | slot | slot | ... ]  ──► read()                     (FIFO)
//!   never blocks;     oldest slot is           read_latest_coalescing()    (newest + drop
//!   evicts oldest     overwritten when full                                 its older equivalents)
//! ```
//!
//! Writers never wait, so a slow reader can only lose the oldest items, never
//! stall the producer. Every eviction is counted and reported through
//! [`CoalescingRingBuffer::overflow_count`] and the buffer overflow metric.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::metrics::BUFFER_OVERFLOW_TOTAL;

struct RingState<T> {
    slots: Vec<Option<T>>,
    /// Slot holding the oldest item
    head: usize,
    len: usize,
    closed: bool,
}

impl<T> RingState<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(
        &self,
        offset: usize,
    ) -> usize {
        (self.head + offset) % self.capacity()
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = self.slot(1);
        self.len -= 1;
        item
    }

    fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let tail = self.slot(self.len - 1);
        self.len -= 1;
        self.slots[tail].take()
    }

    fn push_back(
        &mut self,
        item: T,
    ) {
        let tail = self.slot(self.len);
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        while let Some(item) = self.pop_front() {
            items.push(item);
        }
        self.head = 0;
        items
    }
}

pub struct CoalescingRingBuffer<T> {
    name: &'static str,
    state: Mutex<RingState<T>>,
    not_empty: Notify,
    overflow: AtomicU64,
}

impl<T> std::fmt::Debug for CoalescingRingBuffer<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CoalescingRingBuffer")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("overflow", &self.overflow_count())
            .finish()
    }
}

impl<T> CoalescingRingBuffer<T> {
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(
        name: &'static str,
        capacity: usize,
    ) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            name,
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
                closed: false,
            }),
            not_empty: Notify::new(),
            overflow: AtomicU64::new(0),
        }
    }

    /// Append `item`, overwriting the oldest one when full.
    ///
    /// Returns `true` when an item was evicted. Writes after [`close`](Self::close)
    /// are discarded.
    pub fn write(
        &self,
        item: T,
    ) -> bool {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            let evicted = if state.len == state.capacity() {
                state.pop_front();
                true
            } else {
                false
            };
            state.push_back(item);
            evicted
        };

        if evicted {
            self.overflow.fetch_add(1, Ordering::Relaxed);
            BUFFER_OVERFLOW_TOTAL.with_label_values(&[self.name]).inc();
            trace!(buffer = self.name, "ring full, oldest item evicted");
        }
        self.not_empty.notify_waiters();
        evicted
    }

    /// Remove the oldest item, waiting until one is written.
    ///
    /// Returns `None` only once the buffer is closed and drained.
    pub async fn read(&self) -> Option<T> {
        self.wait_for(|state| state.pop_front()).await
    }

    pub fn try_read(&self) -> Option<T> {
        self.state.lock().pop_front()
    }

    /// Remove every buffered item, oldest first.
    pub fn drain_all(&self) -> Vec<T> {
        self.state.lock().drain()
    }

    /// Remove and return the newest item, discarding every older item that
    /// `equivalent(latest, older)` matches. Survivors keep their order.
    pub async fn read_latest_coalescing<F>(
        &self,
        equivalent: F,
    ) -> Option<T>
    where
        F: Fn(&T, &T) -> bool,
    {
        self.wait_for(|state| {
            let latest = state.pop_back()?;
            let before = state.len;
            for older in state.drain() {
                if !equivalent(&latest, &older) {
                    state.push_back(older);
                }
            }
            if state.len < before {
                trace!(dropped = before - state.len, "coalesced superseded items");
            }
            Some(latest)
        })
        .await
    }

    /// Wake every blocked reader and refuse further writes.
    ///
    /// Items already buffered can still be read. Idempotent.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    /// Items evicted by writes into a full buffer since creation
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    async fn wait_for<F>(
        &self,
        mut take: F,
    ) -> Option<T>
    where
        F: FnMut(&mut RingState<T>) -> Option<T>,
    {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            // Register interest before looking at the state so a write landing
            // between the check and the await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = take(&mut *state) {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }
}
