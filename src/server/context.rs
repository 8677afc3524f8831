use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

use crate::config::ServerConfig;
use crate::metrics::get_current_ms;
use crate::network::ChannelKind;
use crate::proto::LogLevel;
use crate::proto::LogRecord;
use crate::proto::ServerInfo;
use crate::proto::TableUpdate;
use crate::server::BroadcastHub;
use crate::server::SessionRegistry;
use crate::store::TreeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Offline,
    Starting,
    Online,
    Rebooting,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Offline => "OFFLINE",
            ServerStatus::Starting => "STARTING",
            ServerStatus::Online => "ONLINE",
            ServerStatus::Rebooting => "REBOOTING",
        }
    }
}

/// Work handed to the server's control task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Restart,
}

#[derive(Debug, Default)]
pub struct ChannelCounters {
    push: AtomicU64,
    request: AtomicU64,
    broadcast: AtomicU64,
}

impl ChannelCounters {
    pub fn record(
        &self,
        channel: ChannelKind,
    ) {
        let counter = match channel {
            ChannelKind::Push => &self.push,
            ChannelKind::Request => &self.request,
            ChannelKind::Subscribe => &self.broadcast,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(
        &self,
        channel: ChannelKind,
    ) -> u64 {
        match channel {
            ChannelKind::Push => self.push.load(Ordering::Relaxed),
            ChannelKind::Request => self.request.load(Ordering::Relaxed),
            ChannelKind::Subscribe => self.broadcast.load(Ordering::Relaxed),
        }
    }
}

/// Everything one server incarnation shares between its connection tasks.
///
/// Replaces process-wide singletons: the [`Server`](crate::server::Server)
/// that owns it decides when it is created, started, stopped and restarted.
#[derive(Debug)]
pub struct ServerContext {
    pub config: ServerConfig,
    pub store: TreeStore,
    pub hub: BroadcastHub,
    pub session: SessionRegistry,
    pub counters: ChannelCounters,
    debug: AtomicBool,
    status: RwLock<ServerStatus>,
    started_at: Mutex<Instant>,
    control_tx: mpsc::Sender<ControlCommand>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        control_tx: mpsc::Sender<ControlCommand>,
    ) -> Self {
        let hub = BroadcastHub::new(config.subscriber_buffer_size);
        Self {
            config,
            store: TreeStore::new(),
            hub,
            session: SessionRegistry::new(),
            counters: ChannelCounters::default(),
            debug: AtomicBool::new(false),
            status: RwLock::new(ServerStatus::Offline),
            started_at: Mutex::new(Instant::now()),
            control_tx,
        }
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(
        &self,
        status: ServerStatus,
    ) {
        *self.status.write() = status;
        if status == ServerStatus::Online {
            *self.started_at.lock() = Instant::now();
        }
        self.log_to_clients(LogLevel::Info, format!("server status {}", status.as_str()));
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(
        &self,
        enabled: bool,
    ) {
        self.debug.store(enabled, Ordering::Relaxed);
        info!(enabled, "debug log forwarding toggled");
    }

    /// Ask the control task to run `command`. Never blocks.
    pub fn request_control(
        &self,
        command: ControlCommand,
    ) -> bool {
        match self.control_tx.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!("control command {:?} not queued: {}", command, e);
                false
            }
        }
    }

    /// Forward a diagnostic to LOG subscribers while debug mode is on.
    pub fn log_to_clients(
        &self,
        level: LogLevel,
        message: impl Into<String>,
    ) {
        if !self.is_debug() {
            return;
        }
        let record = LogRecord {
            level: level as i32,
            message: message.into(),
            timestamp_ms: get_current_ms(),
        };
        self.hub.publish(TableUpdate::log(&record));
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            version: self.config.version.clone(),
            status: self.status().as_str().to_string(),
            session_token: self.session.current().to_vec(),
            uptime_ms: self.started_at.lock().elapsed().as_millis() as u64,
            value_count: self.store.size() as u64,
            subscriber_count: self.hub.subscriber_count() as u32,
            debug: self.is_debug(),
            push_messages: self.counters.get(ChannelKind::Push),
            request_messages: self.counters.get(ChannelKind::Request),
            broadcast_messages: self.counters.get(ChannelKind::Subscribe),
            clients: self.session.clients(),
            session_rotations: self.session.rotations(),
        }
    }
}
