use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use prost::Message;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use super::connection::ClientCore;
use super::connection::PendingRequest;
use super::DeleteCallback;
use super::KeyUpdate;
use super::LogCallback;
use super::SubscriptionId;
use super::Topic;
use super::UpdateCallback;
use crate::errors::KeyFormatError;
use crate::errors::SnapshotError;
use crate::errors::TransportError;
use crate::network::ConnectionState;
use crate::network::ConnectivitySnapshot;
use crate::proto::LogRecord;
use crate::proto::ReplyStatus;
use crate::proto::ServerInfo;
use crate::proto::TableMessage;
use crate::store::validate_key;
use crate::store::validate_name;
use crate::store::TreeStore;
use crate::utils::async_task::task_with_timeout;
use crate::value::TableValue;
use crate::value::TypedValue;
use crate::Error;
use crate::Result;

pub(super) struct ClientInner {
    pub(super) core: Arc<ClientCore>,
    pub(super) requests: mpsc::Sender<PendingRequest>,
    /// Strictly one request in flight per client
    pub(super) request_gate: tokio::sync::Mutex<()>,
    pub(super) tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a treebus server. Cheap to clone; every clone shares the same
/// three connections.
///
/// Created through [`ClientBuilder`](super::ClientBuilder). Reads and admin
/// operations go over the request channel and fail fast with
/// [`TransportError::NotConnected`] while the client is reconnecting.
#[derive(Clone)]
pub struct Client {
    pub(super) inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.core.client_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    pub fn client_id(&self) -> &str {
        &self.inner.core.client_id
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.core.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected.into());
        }
        Ok(())
    }

    fn enqueue(
        &self,
        msg: TableMessage,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.inner.core.outbound.write(msg);
        Ok(())
    }

    /// Store `value` at `key` on the server. Fire-and-forget.
    pub fn put(
        &self,
        key: &str,
        value: impl Into<TypedValue>,
    ) -> Result<()> {
        validate_key(key)?;
        self.enqueue(TableMessage::put(key, &value.into()))
    }

    /// Forward `value` to subscribers of `key` without storing it.
    pub fn publish(
        &self,
        key: &str,
        value: impl Into<TypedValue>,
    ) -> Result<()> {
        validate_key(key)?;
        self.enqueue(TableMessage::publish(key, &value.into()))
    }

    /// Several PUTs applied by the server in order, in one frame.
    pub fn put_batch<K: Into<String>>(
        &self,
        entries: impl IntoIterator<Item = (K, TypedValue)>,
    ) -> Result<()> {
        let mut batch = Vec::new();
        for (key, value) in entries {
            let key = key.into();
            validate_key(&key)?;
            batch.push(TableMessage::put(key, &value));
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.enqueue(TableMessage::new_batch(batch))
    }

    async fn request(
        &self,
        msg: TableMessage,
    ) -> Result<TableMessage> {
        let _gate = self.inner.request_gate.lock().await;
        self.ensure_connected()?;

        let command = msg.command();
        let (responder, reply) = oneshot::channel();
        self.inner
            .requests
            .send(PendingRequest { msg, responder })
            .await
            .map_err(|_| TransportError::NotConnected)?;

        // The request loop enforces the deadline itself; this guards against a
        // request stranded while the connection is being replaced
        let config = &self.inner.core.config;
        let backstop = config.request_timeout() + config.connect_timeout();
        task_with_timeout(command.as_str_name(), backstop, async {
            reply.await.map_err(|_| Error::from(TransportError::NotConnected))?
        })
        .await
    }

    pub async fn get_value(
        &self,
        key: &str,
    ) -> Result<Option<TypedValue>> {
        validate_key(key)?;
        let reply = self.request(TableMessage::get(key)).await?;
        match reply.status() {
            ReplyStatus::Ok => Ok(Some(payload(&reply)?)),
            ReplyStatus::NotFound => Ok(None),
            status => Err(status_error(key, status)),
        }
    }

    /// Typed read. A value stored under another type is a [`Error::TypeMismatch`].
    pub async fn get<T: TableValue>(
        &self,
        key: &str,
    ) -> Result<Option<T>> {
        let Some(value) = self.get_value(key).await? else {
            return Ok(None);
        };
        let actual = value.value_type();
        match T::from_value(value) {
            Some(v) => Ok(Some(v)),
            None => Err(Error::TypeMismatch {
                key: key.to_string(),
                expected: T::TYPE,
                actual,
            }),
        }
    }

    /// Child names under `key` (`""` for the top level), `None` if the prefix
    /// does not exist.
    pub async fn get_tables(
        &self,
        key: &str,
    ) -> Result<Option<BTreeSet<String>>> {
        if !key.is_empty() {
            validate_key(key)?;
        }
        let reply = self.request(TableMessage::get_tables(key)).await?;
        match reply.status() {
            ReplyStatus::Ok => match payload(&reply)? {
                TypedValue::StringList(names) => Ok(Some(names.into_iter().collect())),
                other => Err(unexpected_payload(&reply, other)),
            },
            ReplyStatus::NotFound => Ok(None),
            status => Err(status_error(key, status)),
        }
    }

    /// Remove `key` and its subtree. Returns whether anything was removed.
    pub async fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        validate_key(key)?;
        self.delete_unchecked(key).await
    }

    /// Clear the whole server store.
    pub async fn delete_all(&self) -> Result<bool> {
        self.delete_unchecked("").await
    }

    async fn delete_unchecked(
        &self,
        key: &str,
    ) -> Result<bool> {
        let reply = self.request(TableMessage::delete(key)).await?;
        match reply.status() {
            ReplyStatus::Ok => Ok(true),
            ReplyStatus::NotFound => Ok(false),
            status => Err(status_error(key, status)),
        }
    }

    /// Move `old_key` to the sibling `new_name`. `false` when `old_key` is
    /// missing or the name is taken.
    pub async fn rename(
        &self,
        old_key: &str,
        new_name: &str,
    ) -> Result<bool> {
        validate_key(old_key)?;
        validate_name(new_name)?;
        let reply = self.request(TableMessage::update_key(old_key, new_name)).await?;
        match reply.status() {
            ReplyStatus::Ok => Ok(true),
            ReplyStatus::Failed => Ok(false),
            status => Err(status_error(old_key, status)),
        }
    }

    /// Round-trip time of one PING.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        let reply = self.request(TableMessage::ping()).await?;
        require_ok(&reply, "")?;
        Ok(started.elapsed())
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        let reply = self.request(TableMessage::information()).await?;
        require_ok(&reply, "")?;
        match payload(&reply)? {
            TypedValue::Bytes(bytes) => Ok(ServerInfo::decode(bytes.as_slice()).map_err(TransportError::from)?),
            other => Err(unexpected_payload(&reply, other)),
        }
    }

    /// Ask the server to restart. The reply arrives before the restart begins.
    pub async fn reboot_server(&self) -> Result<()> {
        let reply = self.request(TableMessage::reboot_server()).await?;
        match reply.status() {
            ReplyStatus::Ok => {
                info!("server reboot requested");
                Ok(())
            }
            status => Err(status_error("", status)),
        }
    }

    /// Toggle LOG forwarding on the server. Returns the new setting.
    pub async fn set_server_debug(
        &self,
        enabled: bool,
    ) -> Result<bool> {
        let reply = self.request(TableMessage::debug_toggle(enabled)).await?;
        require_ok(&reply, "")?;
        match payload(&reply)? {
            TypedValue::Bool(enabled) => Ok(enabled),
            other => Err(unexpected_payload(&reply, other)),
        }
    }

    /// The server store rendered as nested JSON.
    pub async fn raw_json(&self) -> Result<Json> {
        let reply = self.request(TableMessage::raw_json()).await?;
        require_ok(&reply, "")?;
        match payload(&reply)? {
            TypedValue::String(text) => Ok(serde_json::from_str(&text).map_err(SnapshotError::from)?),
            other => Err(unexpected_payload(&reply, other)),
        }
    }

    /// Full binary copy of the server store.
    pub async fn snapshot(&self) -> Result<TreeStore> {
        let reply = self.request(TableMessage::proto_data()).await?;
        require_ok(&reply, "")?;
        match payload(&reply)? {
            TypedValue::Bytes(bytes) => Ok(TreeStore::deserialize(&bytes)?),
            other => Err(unexpected_payload(&reply, other)),
        }
    }

    fn topics_changed(&self) {
        self.inner.core.topics_changed.notify_one();
    }

    /// Call `callback` for every update or publish of exactly `key`.
    pub fn subscribe<F>(
        &self,
        key: &str,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&KeyUpdate) + Send + Sync + 'static,
    {
        validate_key(key)?;
        Ok(self.add_update(key, Arc::new(callback)))
    }

    /// Call `callback` for every update or publish of any key.
    pub fn subscribe_all<F>(
        &self,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&KeyUpdate) + Send + Sync + 'static,
    {
        self.add_update("", Arc::new(callback))
    }

    fn add_update(
        &self,
        key: &str,
        callback: UpdateCallback,
    ) -> SubscriptionId {
        let id = self.inner.core.subscriptions.add_update(key, callback);
        self.topics_changed();
        id
    }

    /// Call `callback` with the deleted key whenever `key` is deleted. The
    /// empty key matches every deletion.
    pub fn subscribe_delete<F>(
        &self,
        key: &str,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if !key.is_empty() {
            validate_key(key)?;
        }
        let callback: DeleteCallback = Arc::new(callback);
        let id = self.inner.core.subscriptions.add_delete(key, callback);
        self.topics_changed();
        Ok(id)
    }

    /// Receive server diagnostics while server debug mode is on.
    pub fn subscribe_logs<F>(
        &self,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        let callback: LogCallback = Arc::new(callback);
        let id = self.inner.core.subscriptions.add_logs(callback);
        self.topics_changed();
        id
    }

    pub fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> bool {
        let removed = self.inner.core.subscriptions.remove(id);
        if removed {
            self.topics_changed();
        }
        removed
    }

    pub fn subscribed_topics(&self) -> BTreeSet<Topic> {
        self.inner.core.subscriptions.desired_topics()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.core.state.subscribe()
    }

    /// Wait until the client is connected with every subscription replayed.
    pub async fn wait_until_ready(
        &self,
        deadline: Duration,
    ) -> Result<()> {
        let mut states = self.state_changes();
        task_with_timeout("wait_until_ready", deadline, async move {
            states
                .wait_for(|state| *state == ConnectionState::Connected)
                .await
                .map_err(|_| Error::from(TransportError::Closed))?;
            Ok(())
        })
        .await
    }

    pub fn connectivity(&self) -> ConnectivitySnapshot {
        self.inner.core.monitor.snapshot()
    }

    /// Latest session token announced by the server.
    pub fn session_token(&self) -> Option<Vec<u8>> {
        self.inner.core.session.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<Option<Vec<u8>>> {
        self.inner.core.session.subscribe()
    }

    /// How many times the server session changed since the first token was seen.
    pub fn session_changes(&self) -> u64 {
        self.inner.core.session_changes.load(Ordering::Relaxed)
    }

    /// Broadcast events dropped because callbacks fell behind.
    pub fn overflow_count(&self) -> u64 {
        self.inner.core.inbound.overflow_count()
    }

    /// Drop the current connection and reconnect, replaying every subscription.
    pub fn force_reconnect(&self) {
        debug!("forced reconnect");
        self.inner.core.force_reconnect();
    }

    /// Close every channel and stop background tasks. Idempotent.
    pub async fn shutdown(&self) {
        let core = &self.inner.core;
        core.shutdown.cancel();
        core.outbound.close();
        core.inbound.close();

        let tasks: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                debug!("client task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
        self.core.outbound.close();
        self.core.inbound.close();
    }
}

fn payload(reply: &TableMessage) -> Result<TypedValue> {
    match reply.typed_value() {
        Some(value) => Ok(value?),
        None => Err(TransportError::UnexpectedReply {
            expected: "payload".to_string(),
            actual: format!("empty {} reply", reply.command()),
        }
        .into()),
    }
}

fn unexpected_payload(
    reply: &TableMessage,
    value: TypedValue,
) -> Error {
    TransportError::UnexpectedReply {
        expected: reply.command().as_str_name().to_string(),
        actual: format!("{:?} payload", value.value_type()),
    }
    .into()
}

/// Admin replies carry a payload only when the server answered OK.
pub(super) fn require_ok(
    reply: &TableMessage,
    key: &str,
) -> Result<()> {
    match reply.status() {
        ReplyStatus::Ok => Ok(()),
        status => Err(status_error(key, status)),
    }
}

fn status_error(
    key: &str,
    status: ReplyStatus,
) -> Error {
    match status {
        ReplyStatus::InvalidKey => KeyFormatError::Rejected(key.to_string()).into(),
        other => Error::Fatal(format!("server answered {} for '{}'", other.as_str_name(), key)),
    }
}
