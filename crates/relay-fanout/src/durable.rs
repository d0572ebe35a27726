//! Fan-out across processes sharing one store.
//!
//! Store layout per session `id` under namespace `ns`:
//!
//! | key                  | contents                                      |
//! |----------------------|-----------------------------------------------|
//! | `ns__<id>:map`       | backlog payloads by entry key                 |
//! | `ns__<id>:order`     | backlog entry keys, oldest first              |
//! | `ns__<id>:online`    | online marker, expires after `online_ttl`     |
//!
//! Emitting enumerates sessions from the online markers. Sessions attached in
//! this process get the payload directly; every other known session gets it
//! appended to its backlog, to be drained by whichever process attaches it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::constants::PAGE_SIZE;
use relay_core::{BacklogKey, FaultReporter};
use relay_settings::FanoutSettings;
use relay_store::{Expiry, SharedStore, StoreMap};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{FanoutError, Result};
use crate::registry::{Backlog, ConnectionRegistry, Deliver};

const ONLINE_VALUE: &str = "online";

/// Session fan-out backed by a shared store.
pub struct DurableFanOut<P> {
    registry: ConnectionRegistry<P>,
    store: SharedStore,
    namespace: String,
    online_ttl_secs: u64,
    backlog_expiry: Expiry,
    poll_interval: Duration,
}

impl<P> DurableFanOut<P>
where
    P: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a fan-out over `store`.
    pub fn new(store: SharedStore, settings: &FanoutSettings, reporter: FaultReporter) -> Self {
        Self {
            registry: ConnectionRegistry::new(reporter),
            store,
            namespace: settings.emit_namespace.clone(),
            online_ttl_secs: settings.online_ttl_secs.max(1),
            backlog_expiry: Expiry::from_secs(settings.backlog_ttl_secs),
            poll_interval: Duration::from_millis(settings.backlog_poll_interval_ms.max(1)),
        }
    }

    /// The local registry.
    pub fn registry(&self) -> &ConnectionRegistry<P> {
        &self.registry
    }

    /// Base key of the backlog for `id`.
    pub fn backlog_base(&self, id: &str) -> String {
        format!("{}__{id}", self.namespace)
    }

    /// Key of the online marker for `id`.
    pub fn online_key(&self, id: &str) -> String {
        format!("{}__{id}:online", self.namespace)
    }

    /// The backlog for `id`.
    pub fn backlog(&self, id: &str) -> StoreMap<P> {
        StoreMap::new(
            self.store.clone(),
            self.backlog_base(id),
            self.backlog_expiry,
            PAGE_SIZE,
        )
    }

    /// Session ids with a live online marker in any process.
    pub async fn known_sessions(&self) -> Result<Vec<String>> {
        let prefix = format!("{}__", self.namespace);
        let keys = self.store.keys(&format!("{prefix}*:online")).await?;
        let ids: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.strip_suffix(":online"))
            .map(str::to_owned)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Deliver `payload` to every known session.
    ///
    /// Locally attached sessions get it directly and have their marker
    /// refreshed; the rest get it appended to their backlog.
    pub async fn emit(&self, payload: &P) -> Result<()> {
        let known = self.known_sessions().await?;
        let mut buffered = 0usize;
        for id in known.iter().filter(|id| !self.registry.is_attached(id)) {
            self.backlog(id)
                .set_with_keep_expire(BacklogKey::new().as_str(), payload)
                .await
                .map_err(|err| FanoutError::from(err).for_session(id))?;
            buffered += 1;
        }

        let mut pushed = 0usize;
        for id in self.registry.session_ids() {
            mark_online(&self.store, &self.online_key(&id), self.online_ttl_secs)
                .await
                .map_err(|err| err.for_session(&id))?;
            if self.registry.emit_to(&id, payload.clone()) {
                pushed += 1;
            }
        }
        debug!(namespace = %self.namespace, buffered, pushed, "emitted");
        Ok(())
    }

    /// Attach `deliver` to session `id` and mark it online.
    ///
    /// Its backlog is drained first, then live payloads follow. While
    /// attached, the marker is refreshed and the backlog re-checked every
    /// poll interval.
    pub async fn listen_event<D: Deliver<P>>(&self, id: &str, deliver: D) -> Result<()> {
        let online_key = self.online_key(id);
        mark_online(&self.store, &online_key, self.online_ttl_secs)
            .await
            .map_err(|err| err.for_session(id))?;
        let backlog = StoreBacklog {
            map: self.backlog(id),
            store: self.store.clone(),
            online_key,
            online_ttl_secs: self.online_ttl_secs,
        };
        let _ = self.registry.listen_event_with_backlog(
            id,
            Arc::new(deliver),
            Arc::new(backlog),
            self.poll_interval,
        );
        Ok(())
    }

    /// Run `callback` once, on the next local teardown of session `id`.
    pub fn listen_disconnect(&self, id: &str, callback: impl FnOnce() + Send + 'static) {
        self.registry.listen_disconnect(id, callback);
    }

    /// Whether `id` is attached in this process.
    pub fn is_attached(&self, id: &str) -> bool {
        self.registry.is_attached(id)
    }

    /// Tear session `id` down locally. Its marker is left to expire.
    pub fn detach(&self, id: &str) -> bool {
        self.registry.detach(id)
    }

    /// Tear every local session down.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

async fn mark_online(store: &SharedStore, key: &str, ttl_secs: u64) -> Result<()> {
    store.set_ex(key, ONLINE_VALUE, ttl_secs).await?;
    Ok(())
}

/// A session's backlog map plus its online marker.
struct StoreBacklog<P> {
    map: StoreMap<P>,
    store: SharedStore,
    online_key: String,
    online_ttl_secs: u64,
}

#[async_trait]
impl<P> Backlog<P> for StoreBacklog<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn next(&self) -> Result<Option<(String, P)>> {
        Ok(self.map.first().await?)
    }

    async fn ack(&self, key: &str) -> Result<()> {
        Ok(self.map.delete(key).await?)
    }

    async fn stash(&self, payloads: Vec<P>) -> Result<()> {
        for payload in &payloads {
            self.map
                .set_with_keep_expire(BacklogKey::new().as_str(), payload)
                .await?;
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        mark_online(&self.store, &self.online_key, self.online_ttl_secs).await
    }
}

#[cfg(test)]
mod tests {
    use relay_store::{MemoryStore, RemoteStore, Ttl};
    use serde_json::{Value, json};

    use super::*;

    fn fanout(store: &Arc<MemoryStore>) -> DurableFanOut<Value> {
        DurableFanOut::new(store.clone(), &FanoutSettings::default(), FaultReporter::log_only())
    }

    #[test]
    fn key_layout() {
        let store = Arc::new(MemoryStore::new());
        let fanout = fanout(&store);
        assert_eq!(fanout.backlog_base("abc"), "emit__abc");
        assert_eq!(fanout.online_key("abc"), "emit__abc:online");
    }

    #[tokio::test]
    async fn known_sessions_come_from_markers() {
        let store = Arc::new(MemoryStore::new());
        let fanout = fanout(&store);
        store.set_ex("emit__abc:online", "online", 60).await.unwrap();
        store.set_ex("emit__xyz:online", "online", 60).await.unwrap();
        let _ = store.rpush("emit__abc:order", "k").await.unwrap();
        store.set_ex("other__abc:online", "online", 60).await.unwrap();

        assert_eq!(fanout.known_sessions().await.unwrap(), vec!["abc", "xyz"]);
    }

    #[tokio::test(start_paused = true)]
    async fn listening_sets_an_expiring_marker() {
        let store = Arc::new(MemoryStore::new());
        let fanout = fanout(&store);
        fanout.listen_event("abc", |_: Value| async { true }).await.unwrap();

        assert_eq!(store.get("emit__abc:online").await.unwrap().as_deref(), Some("online"));
        assert_eq!(store.pttl("emit__abc:online").await.unwrap(), Ttl::Millis(60_000));
        fanout.shutdown();
    }

    #[tokio::test]
    async fn emit_without_known_sessions_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        fanout(&store).emit(&json!({"x": 1})).await.unwrap();
        assert_eq!(store.key_count(), 0);
    }
}
