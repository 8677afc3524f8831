//! Server lifecycle
//!
//! A [`Server`] owns one [`ServerContext`] for its whole life and binds a
//! fresh set of listeners for every incarnation:
//!
//! ```text
//! Offline ──start──► Starting ──bound──► Online ──REBOOT_SERVER──► Rebooting ──rebound──► Online
//!    ▲                                      │
//!    └──────────────────stop────────────────┘
//! ```
//!
//! A restart tears the listeners down, clears the store, rotates the session
//! token and binds the same ports again, so clients reconnect to the same
//! address and learn about the new incarnation from the REGISTRY broadcast.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::network::ServerAddress;
use crate::server::run_session_ticker;
use crate::server::BoundPorts;
use crate::server::ControlCommand;
use crate::server::Listeners;
use crate::server::ServerContext;
use crate::server::ServerStatus;
use crate::utils::async_task::spawn_task;
use crate::Result;

const BIND_ATTEMPTS: u32 = 10;

/// Tasks of one incarnation
struct Runtime {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct ServerInner {
    ctx: Arc<ServerContext>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
    /// Configured ports until the first bind, then the ports actually bound
    ports: Mutex<BoundPorts>,
    bound: Mutex<Option<BoundPorts>>,
    control_rx: Mutex<Option<mpsc::Receiver<ControlCommand>>>,
}

/// Handle to a running (or stopped) broker. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for Server {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("status", &self.status())
            .field("ports", &self.ports())
            .finish()
    }
}

impl Server {
    pub(crate) fn new(
        ctx: ServerContext,
        control_rx: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        let ports = BoundPorts {
            push: ctx.config.push_port,
            request: ctx.config.request_port,
            broadcast: ctx.config.broadcast_port,
        };
        Self {
            inner: Arc::new(ServerInner {
                ctx: Arc::new(ctx),
                runtime: tokio::sync::Mutex::new(None),
                ports: Mutex::new(ports),
                bound: Mutex::new(None),
                control_rx: Mutex::new(Some(control_rx)),
            }),
        }
    }

    /// Bind the three listeners and begin serving. No-op when already online.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.inner.runtime.lock().await;
        if runtime.is_some() {
            debug!("server already started");
            return Ok(());
        }

        let ctx = &self.inner.ctx;
        ctx.set_status(ServerStatus::Starting);
        match self.inner.launch().await {
            Ok(started) => *runtime = Some(started),
            Err(e) => {
                ctx.set_status(ServerStatus::Offline);
                return Err(e);
            }
        }
        drop(runtime);

        self.spawn_control_task();
        ctx.set_status(ServerStatus::Online);
        info!(ports = ?self.ports(), "treebus server online");
        Ok(())
    }

    /// Stop serving. Idempotent. The store keeps its contents.
    pub async fn stop(&self) {
        let mut runtime = self.inner.runtime.lock().await;
        if let Some(current) = runtime.take() {
            self.inner.teardown(current).await;
            info!("treebus server stopped");
        }
        *self.inner.bound.lock() = None;
        self.inner.ctx.set_status(ServerStatus::Offline);
    }

    /// Tear down, clear all data, start a new session and rebind the same ports.
    pub async fn restart(&self) -> Result<()> {
        self.inner.restart().await
    }

    /// Queue a restart without waiting for it, as REBOOT_SERVER does.
    pub fn request_restart(&self) -> bool {
        self.inner.ctx.request_control(ControlCommand::Restart)
    }

    pub fn status(&self) -> ServerStatus {
        self.inner.ctx.status()
    }

    /// Ports of the current incarnation, `None` while offline.
    pub fn ports(&self) -> Option<BoundPorts> {
        *self.inner.bound.lock()
    }

    /// Where a client on `host` reaches this server.
    pub fn address(
        &self,
        host: impl Into<String>,
    ) -> Option<ServerAddress> {
        self.ports()
            .map(|p| ServerAddress::new(host).with_ports(p.push, p.request, p.broadcast))
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.inner.ctx.clone()
    }

    /// The control task outlives incarnations; it is started by the first
    /// `start` and ends with the server.
    fn spawn_control_task(&self) {
        let Some(mut control_rx) = self.inner.control_rx.lock().take() else {
            return;
        };
        let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(command) = control_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match command {
                    ControlCommand::Restart => {
                        if let Err(e) = inner.restart().await {
                            error!("restart failed: {:?}", e);
                        }
                    }
                }
            }
            debug!("control task finished");
        });
    }
}

impl ServerInner {
    /// Bind (retrying while the previous sockets are released) and spawn the
    /// accept loops plus the session ticker.
    async fn launch(&self) -> Result<Runtime> {
        let requested = *self.ports.lock();
        let host = self.ctx.config.bind_address.clone();
        let retry_delay = self.ctx.config.restart_delay().max(Duration::from_millis(50));

        let mut attempt = 1;
        let listeners = loop {
            match Listeners::bind(&host, requested).await {
                Ok(listeners) => break listeners,
                Err(e) if attempt < BIND_ATTEMPTS => {
                    warn!(attempt, "bind failed, retrying: {}", e);
                    attempt += 1;
                    sleep(retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let bound = listeners.ports()?;
        // Restarts must come back on the same ports, even ephemeral ones
        *self.ports.lock() = bound;
        *self.bound.lock() = Some(bound);

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        let [push, request, broadcast] = listeners.serve(self.ctx.clone(), cancel.clone());
        spawn_task("push listener", push, Some(&mut handles));
        spawn_task("request listener", request, Some(&mut handles));
        spawn_task("broadcast listener", broadcast, Some(&mut handles));
        spawn_task(
            "session ticker",
            run_session_ticker(self.ctx.clone(), cancel.clone()),
            Some(&mut handles),
        );

        Ok(Runtime { cancel, handles })
    }

    async fn teardown(
        &self,
        runtime: Runtime,
    ) {
        runtime.cancel.cancel();
        self.ctx.hub.close_all();
        for handle in runtime.handles {
            if let Err(e) = handle.await {
                warn!("server task ended abnormally: {}", e);
            }
        }
    }

    async fn restart(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let Some(current) = runtime.take() else {
            warn!("restart ignored: server is not running");
            return Ok(());
        };

        info!("restarting treebus server");
        self.ctx.set_status(ServerStatus::Rebooting);
        self.teardown(current).await;
        *self.bound.lock() = None;
        self.ctx.store.clear();
        self.ctx.session.rotate();
        sleep(self.ctx.config.restart_delay()).await;

        match self.launch().await {
            Ok(started) => {
                *runtime = Some(started);
                self.ctx.set_status(ServerStatus::Online);
                info!("treebus server back online");
                Ok(())
            }
            Err(e) => {
                self.ctx.set_status(ServerStatus::Offline);
                Err(e)
            }
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.cancel.cancel();
        }
        self.ctx.hub.close_all();
    }
}
