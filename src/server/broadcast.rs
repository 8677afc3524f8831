//! Fan-out of table events to broadcast subscribers
//!
//! ```text
//! dispatcher ── publish(event) ──► filter per subscriber ──► subscriber ring ──► connection writer task
//! ```
//!
//! Every subscriber owns a bounded [`CoalescingRingBuffer`] read in FIFO
//! order by its connection task. Publishing never waits on a slow socket:
//! when a ring is full its oldest event is dropped and counted.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::buffer::CoalescingRingBuffer;
use crate::constants::SUBSCRIBER_BUFFER;
use crate::proto::Category;
use crate::proto::Command;
use crate::proto::TableMessage;
use crate::proto::TableUpdate;

pub type SubscriberId = u64;

/// Topics one broadcast connection asked for. The empty key means every key.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriberFilter {
    pub updates: HashSet<String>,
    pub deletes: HashSet<String>,
    pub logs: bool,
}

impl SubscriberFilter {
    fn matches(
        keys: &HashSet<String>,
        key: &str,
    ) -> bool {
        keys.contains("") || keys.contains(key)
    }

    pub fn accepts(
        &self,
        event: &TableUpdate,
    ) -> bool {
        match event.category() {
            Category::Update | Category::Publish => Self::matches(&self.updates, &event.key),
            Category::Delete => Self::matches(&self.deletes, &event.key),
            Category::Log => self.logs,
            // Session announcements reach everyone
            Category::Registry | Category::Information => true,
        }
    }

    /// Human-readable topic names, e.g. `update:robot.pose`, `delete:*`, `logs`.
    pub fn topics(&self) -> BTreeSet<String> {
        let name = |key: &String| if key.is_empty() { "*".to_string() } else { key.clone() };
        let mut topics: BTreeSet<String> = self.updates.iter().map(|k| format!("update:{}", name(k))).collect();
        topics.extend(self.deletes.iter().map(|k| format!("delete:{}", name(k))));
        if self.logs {
            topics.insert("logs".to_string());
        }
        topics
    }
}

#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub peer: SocketAddr,
    filter: RwLock<SubscriberFilter>,
    queue: Arc<CoalescingRingBuffer<TableUpdate>>,
}

impl Subscriber {
    pub fn queue(&self) -> Arc<CoalescingRingBuffer<TableUpdate>> {
        self.queue.clone()
    }

    pub fn filter(&self) -> SubscriberFilter {
        self.filter.read().clone()
    }
}

#[derive(Debug)]
pub struct BroadcastHub {
    subscribers: DashMap<SubscriberId, Arc<Subscriber>>,
    next_id: AtomicU64,
    buffer_size: usize,
    published: AtomicU64,
}

impl BroadcastHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer_size,
            published: AtomicU64::new(0),
        }
    }

    pub fn register(
        &self,
        peer: SocketAddr,
    ) -> Arc<Subscriber> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            peer,
            filter: RwLock::new(SubscriberFilter::default()),
            queue: Arc::new(CoalescingRingBuffer::new(SUBSCRIBER_BUFFER, self.buffer_size)),
        });
        self.subscribers.insert(id, subscriber.clone());
        debug!(id, %peer, "broadcast subscriber registered");
        subscriber
    }

    /// Drop a subscriber and release its writer task.
    pub fn remove(
        &self,
        id: SubscriberId,
    ) {
        if let Some((_, subscriber)) = self.subscribers.remove(&id) {
            subscriber.queue.close();
            debug!(id, peer = %subscriber.peer, "broadcast subscriber removed");
        }
    }

    /// Apply a SUBSCRIBE/UNSUBSCRIBE command to `id`'s filter.
    ///
    /// Returns `false` for unknown subscribers and non-subscription commands.
    pub fn apply_subscription(
        &self,
        id: SubscriberId,
        msg: &TableMessage,
    ) -> bool {
        let Some(subscriber) = self.subscribers.get(&id).map(|s| s.clone()) else {
            return false;
        };
        let mut filter = subscriber.filter.write();
        let key = msg.key_str().to_string();
        match (msg.command(), msg.is_log_subscription()) {
            (Command::SubscribeUpdate, true) => filter.logs = true,
            (Command::UnsubscribeUpdate, true) => filter.logs = false,
            (Command::SubscribeUpdate, false) => {
                filter.updates.insert(key);
            }
            (Command::UnsubscribeUpdate, false) => {
                filter.updates.remove(&key);
            }
            (Command::SubscribeDelete, _) => {
                filter.deletes.insert(key);
            }
            (Command::UnsubscribeDelete, _) => {
                filter.deletes.remove(&key);
            }
            (other, _) => {
                warn!(id, command = %other, "unexpected command on broadcast channel");
                return false;
            }
        }
        trace!(id, topics = ?filter.topics(), "subscriber filter updated");
        true
    }

    /// Queue `event` for every subscriber whose filter accepts it.
    ///
    /// Returns the number of subscribers it was queued for.
    pub fn publish(
        &self,
        event: TableUpdate,
    ) -> usize {
        let mut delivered = 0;
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.filter.read().accepts(&event) {
                subscriber.queue.write(event.clone());
                delivered += 1;
            }
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Current topics of every live subscriber, by id.
    pub fn subscriber_topics(&self) -> Vec<(SubscriberId, BTreeSet<String>)> {
        let mut topics: Vec<_> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().filter.read().topics()))
            .collect();
        topics.sort_by_key(|(id, _)| *id);
        topics
    }

    /// Events dropped because a subscriber ring was full, summed over live subscribers.
    pub fn overflow_count(&self) -> u64 {
        self.subscribers.iter().map(|entry| entry.value().queue.overflow_count()).sum()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Close every subscriber ring and forget all subscribers.
    pub fn close_all(&self) {
        for entry in self.subscribers.iter() {
            entry.value().queue.close();
        }
        self.subscribers.clear();
    }
}
