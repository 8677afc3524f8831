//! Connection supervisor
//!
//! One task per client drives the connection state machine:
//!
//! ```text
//!  Disconnected ──► Connecting ──(3 sockets up, topics replayed)──► Connected
//!       ▲               │                                              │
//!       └── backoff ◄───┴──────────────── any channel fails ◄──────────┘
//! ```
//!
//! While connected, each channel is driven by exactly one loop inside the
//! supervisor task. Application calls never touch a socket: writes go through
//! the push ring, requests through a one-slot queue, and broadcast events come
//! back through the inbound ring drained by the consumer task.

use std::collections::BTreeSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use prost::Message;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::buffer::CoalescingRingBuffer;
use crate::client::reconcile;
use crate::client::Subscriptions;
use crate::client::Topic;
use crate::config::ClientConfig;
use crate::errors::TransportError;
use crate::metrics::MESSAGES_TOTAL;
use crate::metrics::RECONNECTS_TOTAL;
use crate::network::AddressResolver;
use crate::network::ChannelKind;
use crate::network::ConnectionState;
use crate::network::ConnectivityMonitor;
use crate::network::MessageSink;
use crate::network::MessageStream;
use crate::network::ServerAddress;
use crate::proto::Category;
use crate::proto::ClientInfo;
use crate::proto::Command;
use crate::proto::TableMessage;
use crate::proto::TableUpdate;
use crate::value::TypedValue;
use crate::Error;
use crate::Result;

pub(crate) type Responder = oneshot::Sender<Result<TableMessage>>;

/// A request waiting for the request loop
pub(crate) struct PendingRequest {
    pub msg: TableMessage,
    pub responder: Responder,
}

/// State shared by the client handle, the supervisor and the consumer task.
pub(crate) struct ClientCore {
    pub config: ClientConfig,
    pub client_id: String,
    pub version: String,
    pub resolver: Arc<dyn AddressResolver>,
    pub monitor: ConnectivityMonitor,
    pub subscriptions: Subscriptions,
    /// Broadcast events waiting for callbacks
    pub inbound: CoalescingRingBuffer<TableUpdate>,
    /// Fire-and-forget messages waiting for the push channel
    pub outbound: CoalescingRingBuffer<TableMessage>,
    pub state: watch::Sender<ConnectionState>,
    pub session: watch::Sender<Option<Vec<u8>>>,
    pub session_changes: AtomicU64,
    /// Fired whenever the subscription set changes
    pub topics_changed: Notify,
    pub shutdown: CancellationToken,
    /// Cancels the current connection only
    pub connection: Mutex<CancellationToken>,
}

impl ClientCore {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(
        &self,
        state: ConnectionState,
    ) {
        self.state.send_replace(state);
    }

    pub fn force_reconnect(&self) {
        self.connection.lock().cancel();
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            id: self.client_id.clone(),
            version: self.version.clone(),
            buffer_len: self.inbound.len() as u32,
            buffer_capacity: self.inbound.capacity() as u32,
            overflow: self.inbound.overflow_count(),
            subscriptions: self.subscriptions.desired_topics().iter().map(Topic::to_string).collect(),
        }
    }

    /// Track the server's session token. Returns true when it changed.
    ///
    /// The first token ever seen is not counted as a change.
    pub(super) fn observe_session(
        &self,
        token: &[u8],
    ) -> bool {
        let mut first = false;
        let changed = self.session.send_if_modified(|current| {
            if current.as_deref() == Some(token) {
                return false;
            }
            first = current.is_none();
            *current = Some(token.to_vec());
            true
        });
        if changed && !first {
            self.session_changes.fetch_add(1, Ordering::Relaxed);
            info!(token = %String::from_utf8_lossy(token), "server session changed");
        }
        changed
    }
}

struct Channels {
    push: TcpStream,
    request: TcpStream,
    broadcast: TcpStream,
}

/// Supervisor loop: connect, run, back off, repeat until shutdown.
pub(crate) async fn run_supervisor(
    core: Arc<ClientCore>,
    mut requests: mpsc::Receiver<PendingRequest>,
) -> Result<()> {
    let mut attempt: u32 = 0;

    while !core.shutdown.is_cancelled() {
        core.set_state(ConnectionState::Connecting);
        match connect_all(&core).await {
            Ok((address, channels)) => {
                attempt = 0;
                let connection = core.shutdown.child_token();
                *core.connection.lock() = connection.clone();

                if let Err(e) = run_connection(&core, &address, channels, &mut requests, connection).await {
                    warn!("connection to {} lost: {}", address, e);
                }
                for channel in ChannelKind::ALL {
                    core.monitor.record_disconnected(channel);
                }
                fail_pending(&mut requests);
            }
            Err(e) => debug!("connect attempt failed: {}", e),
        }
        core.set_state(ConnectionState::Disconnected);

        if core.shutdown.is_cancelled() {
            break;
        }
        RECONNECTS_TOTAL.inc();
        let delay = core.config.reconnect.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = core.shutdown.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    requests.close();
    fail_pending(&mut requests);
    core.set_state(ConnectionState::Disconnected);
    debug!("connection supervisor stopped");
    Ok(())
}

fn fail_pending(requests: &mut mpsc::Receiver<PendingRequest>) {
    while let Ok(pending) = requests.try_recv() {
        let _ = pending.responder.send(Err(TransportError::NotConnected.into()));
    }
}

async fn connect_one(
    core: &ClientCore,
    channel: ChannelKind,
    addr: String,
) -> Result<TcpStream> {
    core.monitor.record_connecting(channel);
    let stream = match timeout(core.config.connect_timeout(), TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::Connect { addr, source }.into()),
        Err(_) => {
            return Err(Error::Timeout {
                command: format!("connect {channel}"),
                duration: core.config.connect_timeout(),
            })
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {}", e);
    }
    core.monitor.record_connected(channel);
    Ok(stream)
}

async fn connect_all(core: &ClientCore) -> Result<(ServerAddress, Channels)> {
    let address = core.resolver.resolve().await?;
    trace!(%address, "connecting");
    let channels = Channels {
        push: connect_one(core, ChannelKind::Push, address.push_addr()).await?,
        request: connect_one(core, ChannelKind::Request, address.request_addr()).await?,
        broadcast: connect_one(core, ChannelKind::Subscribe, address.broadcast_addr()).await?,
    };
    Ok((address, channels))
}

async fn run_connection(
    core: &ClientCore,
    address: &ServerAddress,
    channels: Channels,
    requests: &mut mpsc::Receiver<PendingRequest>,
    connection: CancellationToken,
) -> Result<()> {
    let max_frame_length = core.config.max_frame_length;
    let (broadcast_read, broadcast_write) = channels.broadcast.into_split();
    let mut subscribe_sink = MessageSink::<_, TableMessage>::new(broadcast_write, max_frame_length);
    let subscribe_stream = MessageStream::<_, TableUpdate>::new(broadcast_read, max_frame_length);

    // Replay every topic before declaring the client ready
    let mut sent = BTreeSet::new();
    sync_topics(core, &mut subscribe_sink, &mut sent).await?;
    core.set_state(ConnectionState::Connected);
    info!(%address, topics = sent.len(), "connected");

    let draining = CancellationToken::new();
    let requests_task = request_loop(core, address, channels.request, requests, draining.clone());
    tokio::pin!(requests_task);
    let mut requests_done = false;

    let result = tokio::select! {
        _ = connection.cancelled() => Ok(()),
        r = push_loop(core, channels.push) => r,
        r = &mut requests_task => {
            requests_done = true;
            r
        }
        r = subscribe_loop(core, subscribe_sink, subscribe_stream, sent) => r,
    };
    core.set_state(ConnectionState::Disconnected);

    // A reply already on its way (REBOOT_SERVER closes every channel right
    // after answering) is still handed to its caller
    if !requests_done {
        draining.cancel();
        if let Err(e) = timeout(core.config.request_timeout(), &mut requests_task).await.unwrap_or(Ok(())) {
            debug!("request in flight failed while disconnecting: {}", e);
        }
    }
    result
}

async fn sync_topics(
    core: &ClientCore,
    sink: &mut MessageSink<OwnedWriteHalf, TableMessage>,
    sent: &mut BTreeSet<Topic>,
) -> Result<()> {
    let desired = core.subscriptions.desired_topics();
    for msg in reconcile(&desired, sent) {
        trace!(command = %msg.command(), key = msg.key_str(), "topic change");
        sink.send(&msg).await?;
    }
    *sent = desired;
    Ok(())
}

async fn push_loop(
    core: &ClientCore,
    stream: TcpStream,
) -> Result<()> {
    let mut sink = MessageSink::<_, TableMessage>::new(stream, core.config.max_frame_length);
    while let Some(msg) = core.outbound.read().await {
        sink.send(&msg).await?;
        MESSAGES_TOTAL.with_label_values(&[ChannelKind::Push.as_str()]).inc();
    }
    Ok(())
}

type RequestChannel = (
    MessageSink<OwnedWriteHalf, TableMessage>,
    MessageStream<OwnedReadHalf, TableMessage>,
);

fn request_channel(
    stream: TcpStream,
    max_frame_length: usize,
) -> RequestChannel {
    let (read_half, write_half) = stream.into_split();
    (
        MessageSink::new(write_half, max_frame_length),
        MessageStream::new(read_half, max_frame_length),
    )
}

/// Send `msg` and wait for its reply on a strictly request-then-reply channel.
async fn exchange(
    channel: &mut RequestChannel,
    msg: &TableMessage,
) -> Result<TableMessage> {
    channel.0.send(msg).await?;
    let reply = channel
        .1
        .recv()
        .await?
        .ok_or(TransportError::ConnectionLost(ChannelKind::Request.as_str()))?;
    let expected = msg.command();
    let actual = reply.command();
    if actual != expected && actual != Command::UnknownCommand {
        return Err(TransportError::UnexpectedReply {
            expected: expected.as_str_name().to_string(),
            actual: actual.as_str_name().to_string(),
        }
        .into());
    }
    Ok(reply)
}

async fn request_loop(
    core: &ClientCore,
    address: &ServerAddress,
    stream: TcpStream,
    requests: &mut mpsc::Receiver<PendingRequest>,
    draining: CancellationToken,
) -> Result<()> {
    let max_frame_length = core.config.max_frame_length;
    let request_timeout = core.config.request_timeout();
    let mut channel = request_channel(stream, max_frame_length);

    loop {
        // Once draining, queued requests stay queued and fail as not connected
        let PendingRequest { msg, responder } = tokio::select! {
            biased;
            _ = draining.cancelled() => return Ok(()),
            next = requests.recv() => match next {
                Some(pending) => pending,
                None => return Ok(()),
            },
        };
        if responder.is_closed() {
            continue;
        }
        match timeout(request_timeout, exchange(&mut channel, &msg)).await {
            Ok(Ok(reply)) => {
                MESSAGES_TOTAL.with_label_values(&[ChannelKind::Request.as_str()]).inc();
                let _ = responder.send(Ok(reply));
            }
            Ok(Err(e)) => {
                let _ = responder.send(Err(TransportError::ConnectionLost(ChannelKind::Request.as_str()).into()));
                return Err(e);
            }
            Err(_) => {
                let command = msg.command();
                warn!(%command, "request timed out, re-opening request channel");
                let _ = responder.send(Err(Error::Timeout {
                    command: command.as_str_name().to_string(),
                    duration: request_timeout,
                }));
                if draining.is_cancelled() {
                    return Ok(());
                }
                // A late reply must never be taken for the next request's
                let stream = connect_one(core, ChannelKind::Request, address.request_addr()).await?;
                channel = request_channel(stream, max_frame_length);
            }
        }
    }
}

async fn subscribe_loop(
    core: &ClientCore,
    mut sink: MessageSink<OwnedWriteHalf, TableMessage>,
    mut stream: MessageStream<OwnedReadHalf, TableUpdate>,
    mut sent: BTreeSet<Topic>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = core.topics_changed.notified() => {
                sync_topics(core, &mut sink, &mut sent).await?;
            }
            event = stream.recv() => match event {
                Ok(Some(event)) => {
                    MESSAGES_TOTAL.with_label_values(&[ChannelKind::Subscribe.as_str()]).inc();
                    handle_event(core, event);
                }
                Ok(None) => {
                    return Err(TransportError::ConnectionLost(ChannelKind::Subscribe.as_str()).into());
                }
                Err(TransportError::Decode(e)) => {
                    warn!("dropping undecodable broadcast frame: {}", e);
                }
                Err(e) => return Err(e.into()),
            },
        }
    }
}

pub(super) fn handle_event(
    core: &ClientCore,
    event: TableUpdate,
) {
    let report = match event.category() {
        Category::Registry => Command::Registry,
        Category::Information => Command::Information,
        _ => {
            core.inbound.write(event);
            return;
        }
    };
    let token = match event.typed_value() {
        Ok(TypedValue::Bytes(token)) => token,
        _ => {
            warn!("dropping malformed session broadcast");
            return;
        }
    };
    core.observe_session(&token);
    let info = core.client_info().encode_to_vec();
    core.outbound.write(TableMessage::client_report(report, &token, info));
}

/// Drain the inbound ring into callbacks until the ring is closed.
pub(crate) async fn run_consumer(core: Arc<ClientCore>) -> Result<()> {
    while let Some(event) = core.inbound.read_latest_coalescing(supersedes).await {
        core.subscriptions.dispatch(&event);
    }
    Ok(())
}

/// Only the newest event per key matters to a callback, whatever its
/// category, so a key is never delivered out of order. Log records are never
/// collapsed.
pub(crate) fn supersedes(
    latest: &TableUpdate,
    older: &TableUpdate,
) -> bool {
    latest.key == older.key && latest.category() != Category::Log && older.category() != Category::Log
}
