//! Client-side subscription registry
//!
//! Callbacks are registered per key (the empty key means every key) and are
//! the single source of truth for what the broadcast connection must ask the
//! server for. After every reconnect the desired topic set is replayed from
//! scratch, so a reconnect can neither drop nor duplicate a subscription.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use prost::Message;
use tracing::error;
use tracing::warn;

use crate::metrics::MALFORMED_MESSAGES_TOTAL;
use crate::network::ChannelKind;
use crate::proto::Category;
use crate::proto::LogRecord;
use crate::proto::TableMessage;
use crate::proto::TableUpdate;
use crate::value::TypedValue;

/// A value change delivered to update callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyUpdate {
    pub key: String,
    /// [`Category::Update`] for stored values, [`Category::Publish`] for
    /// values that were only forwarded
    pub category: Category,
    pub value: TypedValue,
}

pub type UpdateCallback = Arc<dyn Fn(&KeyUpdate) + Send + Sync>;
pub type DeleteCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type LogCallback = Arc<dyn Fn(&LogRecord) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// One server-side filter entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Update(String),
    Delete(String),
    Logs,
}

impl Topic {
    pub fn subscribe_message(&self) -> TableMessage {
        match self {
            Topic::Update(key) => TableMessage::subscribe_update(key.as_str()),
            Topic::Delete(key) => TableMessage::subscribe_delete(key.as_str()),
            Topic::Logs => TableMessage::subscribe_logs(),
        }
    }

    pub fn unsubscribe_message(&self) -> TableMessage {
        match self {
            Topic::Update(key) => TableMessage::unsubscribe_update(key.as_str()),
            Topic::Delete(key) => TableMessage::unsubscribe_delete(key.as_str()),
            Topic::Logs => TableMessage::unsubscribe_logs(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = |key: &str| if key.is_empty() { "*".to_string() } else { key.to_string() };
        match self {
            Topic::Update(key) => write!(f, "update:{}", name(key)),
            Topic::Delete(key) => write!(f, "delete:{}", name(key)),
            Topic::Logs => f.write_str("logs"),
        }
    }
}

/// Messages turning the server's view `sent` into `desired`, unsubscribes first.
pub fn reconcile(
    desired: &BTreeSet<Topic>,
    sent: &BTreeSet<Topic>,
) -> Vec<TableMessage> {
    sent.difference(desired)
        .map(Topic::unsubscribe_message)
        .chain(desired.difference(sent).map(Topic::subscribe_message))
        .collect()
}

#[derive(Clone)]
enum Handler {
    Update { key: String, callback: UpdateCallback },
    Delete { key: String, callback: DeleteCallback },
    Logs(LogCallback),
}

impl Handler {
    fn topic(&self) -> Topic {
        match self {
            Handler::Update { key, .. } => Topic::Update(key.clone()),
            Handler::Delete { key, .. } => Topic::Delete(key.clone()),
            Handler::Logs(_) => Topic::Logs,
        }
    }
}

#[derive(Default)]
pub struct Subscriptions {
    handlers: RwLock<BTreeMap<SubscriptionId, Handler>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Subscriptions {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("topics", &self.desired_topics())
            .finish()
    }
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &self,
        handler: Handler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().insert(id, handler);
        id
    }

    pub fn add_update(
        &self,
        key: impl Into<String>,
        callback: UpdateCallback,
    ) -> SubscriptionId {
        self.insert(Handler::Update {
            key: key.into(),
            callback,
        })
    }

    pub fn add_delete(
        &self,
        key: impl Into<String>,
        callback: DeleteCallback,
    ) -> SubscriptionId {
        self.insert(Handler::Delete {
            key: key.into(),
            callback,
        })
    }

    pub fn add_logs(
        &self,
        callback: LogCallback,
    ) -> SubscriptionId {
        self.insert(Handler::Logs(callback))
    }

    pub fn remove(
        &self,
        id: SubscriptionId,
    ) -> bool {
        self.handlers.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Topics the server must be subscribed to right now. Several callbacks on
    /// one key share one topic.
    pub fn desired_topics(&self) -> BTreeSet<Topic> {
        self.handlers.read().values().map(Handler::topic).collect()
    }

    /// Invoke every callback interested in `event`. Returns how many ran.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe themselves. A panicking callback is logged and skipped.
    pub fn dispatch(
        &self,
        event: &TableUpdate,
    ) -> usize {
        let matches = |key: &str| key.is_empty() || key == event.key;
        let handlers: Vec<Handler> = self.handlers.read().values().cloned().collect();

        match event.category() {
            Category::Update | Category::Publish => {
                let value = match event.typed_value() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(key = %event.key, "dropping undecodable update: {}", e);
                        MALFORMED_MESSAGES_TOTAL.with_label_values(&[ChannelKind::Subscribe.as_str()]).inc();
                        return 0;
                    }
                };
                let update = KeyUpdate {
                    key: event.key.clone(),
                    category: event.category(),
                    value,
                };
                run_each(
                    handlers.iter().filter_map(|h| match h {
                        Handler::Update { key, callback } if matches(key) => Some(callback),
                        _ => None,
                    }),
                    |cb| cb(&update),
                )
            }
            Category::Delete => run_each(
                handlers.iter().filter_map(|h| match h {
                    Handler::Delete { key, callback } if matches(key) => Some(callback),
                    _ => None,
                }),
                |cb| cb(&event.key),
            ),
            Category::Log => {
                let record = match LogRecord::decode(event.value.as_slice()) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("dropping undecodable log record: {}", e);
                        MALFORMED_MESSAGES_TOTAL.with_label_values(&[ChannelKind::Subscribe.as_str()]).inc();
                        return 0;
                    }
                };
                run_each(
                    handlers.iter().filter_map(|h| match h {
                        Handler::Logs(callback) => Some(callback),
                        _ => None,
                    }),
                    |cb| cb(&record),
                )
            }
            // Session traffic is consumed by the connection, never by callbacks
            Category::Registry | Category::Information => 0,
        }
    }
}

fn run_each<'a, C: 'a + ?Sized>(
    callbacks: impl Iterator<Item = &'a Arc<C>>,
    invoke: impl Fn(&C),
) -> usize {
    let mut ran = 0;
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| invoke(&**callback))).is_err() {
            error!("subscription callback panicked");
        }
        ran += 1;
    }
    ran
}
