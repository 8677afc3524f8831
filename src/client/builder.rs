use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::connection::run_consumer;
use super::connection::run_supervisor;
use super::connection::ClientCore;
use super::Client;
use super::ClientInner;
use super::Subscriptions;
use crate::buffer::CoalescingRingBuffer;
use crate::config::ClientConfig;
use crate::config::ReconnectPolicy;
use crate::constants::CLIENT_INBOUND_BUFFER;
use crate::constants::CLIENT_PUSH_BUFFER;
use crate::network::AddressResolver;
use crate::network::ConnectionState;
use crate::network::ConnectivityMonitor;
use crate::network::ServerAddress;
use crate::network::StaticResolver;
use crate::utils::async_task::spawn_task;
use crate::Result;

pub struct ClientBuilder {
    config: ClientConfig,
    resolver: Option<Arc<dyn AddressResolver>>,
    client_id: Option<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Create a new builder with default config, connecting to the configured host
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            resolver: None,
            client_id: None,
        }
    }

    /// Server host, keeping the configured ports
    pub fn host(
        mut self,
        host: impl Into<String>,
    ) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn ports(
        mut self,
        push: u16,
        request: u16,
        broadcast: u16,
    ) -> Self {
        self.config.push_port = push;
        self.config.request_port = request;
        self.config.broadcast_port = broadcast;
        self
    }

    /// Fixed server address, overriding host and ports
    pub fn address(
        self,
        address: ServerAddress,
    ) -> Self {
        self.resolver(StaticResolver::new(address))
    }

    /// Look the server up before every connection attempt
    pub fn resolver(
        mut self,
        resolver: impl AddressResolver,
    ) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Set connection timeout (default: 1s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set request timeout (default: 2s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reconnect(
        mut self,
        policy: ReconnectPolicy,
    ) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Capacity of the inbound (callback) ring
    pub fn subscription_buffer_size(
        mut self,
        size: usize,
    ) -> Self {
        self.config.subscription_buffer_size = size;
        self
    }

    /// Capacity of the outbound fire-and-forget ring
    pub fn push_buffer_size(
        mut self,
        size: usize,
    ) -> Self {
        self.config.push_buffer_size = size;
        self
    }

    /// Identifier reported to the server. Random when unset.
    pub fn client_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Completely replaces the configuration set so far
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and start the connection supervisor.
    ///
    /// Returns immediately; use [`Client::wait_until_ready`] to wait for the
    /// first connection. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let config = self.config;
        let resolver = self.resolver.unwrap_or_else(|| {
            Arc::new(StaticResolver::new(ServerAddress::new(config.host.clone()).with_ports(
                config.push_port,
                config.request_port,
                config.broadcast_port,
            )))
        });
        let client_id = self.client_id.unwrap_or_else(|| nanoid::nanoid!());
        info!(client_id, "starting treebus client");

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (session, _) = watch::channel(None);
        let shutdown = CancellationToken::new();
        let core = Arc::new(ClientCore {
            inbound: CoalescingRingBuffer::new(CLIENT_INBOUND_BUFFER, config.subscription_buffer_size),
            outbound: CoalescingRingBuffer::new(CLIENT_PUSH_BUFFER, config.push_buffer_size),
            config,
            client_id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            resolver,
            monitor: ConnectivityMonitor::new(),
            subscriptions: Subscriptions::new(),
            state,
            session,
            session_changes: Default::default(),
            topics_changed: Notify::new(),
            connection: Mutex::new(shutdown.child_token()),
            shutdown,
        });

        // One slot: the request gate already keeps a single request in flight
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let mut tasks = Vec::new();
        spawn_task("connection supervisor", run_supervisor(core.clone(), requests_rx), Some(&mut tasks));
        spawn_task("subscription consumer", run_consumer(core.clone()), Some(&mut tasks));

        Ok(Client {
            inner: Arc::new(ClientInner {
                core,
                requests: requests_tx,
                request_gate: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(tasks),
            }),
        })
    }
}
