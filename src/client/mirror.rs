//! Local mirror of the server store
//!
//! Bootstraps from a binary snapshot, then applies every UPDATE and DELETE
//! broadcast to an in-process [`TreeStore`]. A full resync replaces the copy
//! wholesale on a fixed interval and whenever the server session changes, so
//! a missed or reordered event heals within one interval.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::client::Client;
use crate::client::SubscriptionId;
use crate::proto::Category;
use crate::store::TreeStore;
use crate::value::TypedValue;
use crate::Result;

pub struct LocalMirror {
    client: Client,
    store: Arc<TreeStore>,
    subscriptions: Vec<SubscriptionId>,
    cancel: CancellationToken,
    resync_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LocalMirror {
    /// Subscribe, fetch the first snapshot and start periodic resync.
    ///
    /// Subscriptions are registered before the snapshot is requested, so an
    /// update racing with the fetch is never lost for longer than one resync.
    pub async fn start(client: Client) -> Result<Self> {
        let store = Arc::new(TreeStore::new());

        let updates = {
            let store = store.clone();
            client.subscribe_all(move |update| {
                // PUBLISH values are transient and never stored
                if update.category != Category::Update {
                    return;
                }
                if let Err(e) = store.put(&update.key, update.value.clone()) {
                    warn!(key = %update.key, "mirror ignored update: {}", e);
                }
            })
        };
        let deletes = {
            let store = store.clone();
            client.subscribe_delete("", move |key| {
                if let Err(e) = store.delete(key) {
                    warn!(key, "mirror ignored delete: {}", e);
                }
            })?
        };

        let mirror = Self {
            client,
            store,
            subscriptions: vec![updates, deletes],
            cancel: CancellationToken::new(),
            resync_task: parking_lot::Mutex::new(None),
        };
        if let Err(e) = mirror.resync_now().await {
            mirror.release_subscriptions();
            return Err(e);
        }

        let task = tokio::spawn(resync_loop(
            mirror.client.clone(),
            mirror.store.clone(),
            mirror.cancel.clone(),
        ));
        *mirror.resync_task.lock() = Some(task);
        info!(values = mirror.store.size(), "local mirror started");
        Ok(mirror)
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<TypedValue> {
        self.store.get(key).ok().flatten()
    }

    pub fn get_tables(
        &self,
        key: &str,
    ) -> Option<BTreeSet<String>> {
        self.store.list_children(key).ok().flatten()
    }

    pub fn store(&self) -> Arc<TreeStore> {
        self.store.clone()
    }

    /// Replace the local copy with a fresh server snapshot.
    pub async fn resync_now(&self) -> Result<()> {
        resync(&self.client, &self.store).await
    }

    fn release_subscriptions(&self) {
        for id in &self.subscriptions {
            self.client.unsubscribe(*id);
        }
    }

    /// Stop resyncing and drop the subscriptions. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.release_subscriptions();
        let task = self.resync_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!("mirror resync task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for LocalMirror {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn resync(
    client: &Client,
    store: &TreeStore,
) -> Result<()> {
    let snapshot = client.snapshot().await?;
    debug!(values = snapshot.size(), "mirror resynced");
    store.replace_with(snapshot);
    Ok(())
}

async fn resync_loop(
    client: Client,
    store: Arc<TreeStore>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(client.inner.core.config.mirror_resync_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut sessions = client.watch_session();
    sessions.mark_unchanged();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("server session changed, resyncing mirror");
            }
        }
        if let Err(e) = resync(&client, &store).await {
            warn!("mirror resync failed: {}", e);
        }
    }
}
