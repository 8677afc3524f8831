use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// The three logical channels a client keeps open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ChannelKind {
    /// Fire-and-forget writes and publishes
    Push,
    /// Synchronous request/reply
    Request,
    /// Broadcast subscription
    Subscribe,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Push, ChannelKind::Request, ChannelKind::Subscribe];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Push => "push",
            ChannelKind::Request => "request",
            ChannelKind::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Attempting to (re)connect
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Connection attempts since the channel was last connected
    pub retries: u32,
    pub since: Instant,
}

impl ChannelStatus {
    fn new(state: ConnectionState) -> Self {
        Self {
            state,
            retries: 0,
            since: Instant::now(),
        }
    }
}

/// Observes connect/disconnect/retry events per channel.
///
/// Purely diagnostic: nothing in the dispatch path reads it.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    channels: DashMap<ChannelKind, ChannelStatus>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let channels = DashMap::new();
        for kind in ChannelKind::ALL {
            channels.insert(kind, ChannelStatus::new(ConnectionState::Disconnected));
        }
        Self { channels }
    }

    pub fn record_connecting(
        &self,
        kind: ChannelKind,
    ) {
        let mut status = self.channels.entry(kind).or_insert_with(|| ChannelStatus::new(ConnectionState::Disconnected));
        status.retries = status.retries.saturating_add(1);
        if status.state != ConnectionState::Connecting {
            status.state = ConnectionState::Connecting;
            status.since = Instant::now();
        }
    }

    pub fn record_connected(
        &self,
        kind: ChannelKind,
    ) {
        debug!(channel = %kind, "channel connected");
        self.channels.insert(kind, ChannelStatus::new(ConnectionState::Connected));
    }

    pub fn record_disconnected(
        &self,
        kind: ChannelKind,
    ) {
        let mut status = self.channels.entry(kind).or_insert_with(|| ChannelStatus::new(ConnectionState::Disconnected));
        if status.state == ConnectionState::Connected {
            debug!(channel = %kind, "channel disconnected");
            status.state = ConnectionState::Disconnected;
            status.since = Instant::now();
        }
    }

    pub fn state(
        &self,
        kind: ChannelKind,
    ) -> ConnectionState {
        self.channels
            .get(&kind)
            .map(|status| status.state)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            channels: self
                .channels
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}

/// Point-in-time copy of every channel status.
#[derive(Debug, Clone)]
pub struct ConnectivitySnapshot {
    pub channels: BTreeMap<ChannelKind, ChannelStatus>,
}

impl ConnectivitySnapshot {
    pub fn count(
        &self,
        state: ConnectionState,
    ) -> usize {
        self.channels.values().filter(|s| s.state == state).count()
    }

    pub fn all_connected(&self) -> bool {
        self.count(ConnectionState::Connected) == self.channels.len()
    }
}

impl fmt::Display for ConnectivitySnapshot {
    /// e.g. `2 connected, 1 retrying`
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let parts: Vec<String> = [
            (ConnectionState::Connected, "connected"),
            (ConnectionState::Connecting, "retrying"),
            (ConnectionState::Disconnected, "disconnected"),
        ]
        .into_iter()
        .filter_map(|(state, label)| {
            let n = self.count(state);
            (n > 0).then(|| format!("{n} {label}"))
        })
        .collect();
        f.write_str(&parts.join(", "))
    }
}
