//! Session epochs
//!
//! A random token identifies one server incarnation. It is regenerated on a
//! fixed interval, whenever a broadcast subscriber connects and on restart,
//! and is broadcast under the REGISTRY category. Clients only compare
//! successive tokens for discontinuity, never order them.
//!
//! Client statistics are scoped to the current token: every rotation forgets
//! the registered clients, and a report carrying a stale token is ignored.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::constants::SESSION_TOKEN_LEN;
use crate::metrics::SESSION_ROTATIONS_TOTAL;
use crate::proto::ClientInfo;
use crate::proto::TableUpdate;
use crate::server::ServerContext;
use crate::Result;

pub type SessionToken = Arc<Vec<u8>>;

#[derive(Debug)]
pub struct SessionRegistry {
    token: ArcSwap<Vec<u8>>,
    clients: Mutex<Vec<ClientInfo>>,
    rotations: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            token: ArcSwap::from_pointee(generate_token()),
            clients: Mutex::new(Vec::new()),
            rotations: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> SessionToken {
        self.token.load_full()
    }

    /// Start a new epoch and forget every registered client.
    pub fn rotate(&self) -> SessionToken {
        let token = Arc::new(generate_token());
        self.token.store(token.clone());
        self.clients.lock().clear();
        self.rotations.fetch_add(1, Ordering::Relaxed);
        SESSION_ROTATIONS_TOTAL.inc();
        trace!(token = %String::from_utf8_lossy(&token), "session rotated");
        token
    }

    /// Record a client's statistics if `token` is the current one.
    ///
    /// A client already known under the same id is refreshed in place.
    pub fn accept_report(
        &self,
        token: &[u8],
        info: ClientInfo,
    ) -> bool {
        if token != self.token.load().as_slice() {
            debug!(client = %info.id, "stale session token in client report");
            return false;
        }
        let mut clients = self.clients.lock();
        match clients.iter_mut().find(|c| c.id == info.id) {
            Some(existing) => *existing = info,
            None => clients.push(info),
        }
        true
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.clients.lock().clone()
    }

    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }
}

fn generate_token() -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .collect()
}

/// Rotate and announce the session token.
pub(crate) fn announce_new_session(ctx: &ServerContext) {
    let token = ctx.session.rotate();
    ctx.hub.publish(TableUpdate::registry(&token));
}

/// Periodic REGISTRY rotation and INFORMATION refresh until `cancel` fires.
pub(crate) async fn run_session_ticker(
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut registry_tick = interval(ctx.config.session_interval());
    let mut information_tick = interval(ctx.config.information_interval());
    registry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    information_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval completes immediately
    registry_tick.tick().await;
    information_tick.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = registry_tick.tick() => announce_new_session(&ctx),
            _ = information_tick.tick() => {
                let token = ctx.session.current();
                ctx.hub.publish(TableUpdate::session_information(&token));
            }
        }
    }
}
