//! Plain FIFO queue with no expiry, for entries that must never silently vanish.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::SharedStore;
use crate::errors::Result;
use crate::{decode, encode};

/// Key of the persistent queue for one side of a service link.
pub fn connection_key(service: &str, side: &str) -> String {
    format!("{service}__{side}__redis-connection")
}

/// A FIFO queue stored under one key, never expiring.
pub struct ConnectionQueue<T> {
    store: SharedStore,
    key: String,
    _values: PhantomData<fn() -> T>,
}

impl<T> Clone for ConnectionQueue<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key.clone(),
            _values: PhantomData,
        }
    }
}

impl<T> ConnectionQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Bind a queue to `key`.
    pub fn new(store: SharedStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _values: PhantomData,
        }
    }

    /// Bind the queue for `side` of `service`.
    pub fn for_service(store: SharedStore, service: &str, side: &str) -> Self {
        Self::new(store, connection_key(service, side))
    }

    /// Store key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append to the tail.
    pub async fn push(&self, value: &T) -> Result<()> {
        debug!(key = %self.key, "connection push");
        let _ = self.store.rpush(&self.key, &encode(value)?).await?;
        Ok(())
    }

    /// Remove and return the head.
    pub async fn shift(&self) -> Result<Option<T>> {
        debug!(key = %self.key, "connection shift");
        self.store
            .lpop(&self.key)
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Head without removing it.
    pub async fn first(&self) -> Result<Option<T>> {
        self.store
            .lindex(&self.key, 0)
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Number of queued values.
    pub async fn len(&self) -> Result<u64> {
        self.store.llen(&self.key).await
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// All queued values at this instant, head first.
    pub async fn snapshot(&self) -> Result<Vec<T>> {
        self.store
            .lrange(&self.key, 0, -1)
            .await?
            .iter()
            .map(|raw| decode(raw))
            .collect()
    }

    /// Delete the queue.
    pub async fn clear(&self) -> Result<()> {
        debug!(key = %self.key, "connection clear");
        let _ = self.store.del(&self.key).await?;
        Ok(())
    }
}
