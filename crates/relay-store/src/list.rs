//! Ordered list with a TTL policy.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::SharedStore;
use crate::errors::Result;
use crate::expiry::Expiry;
use crate::{decode, encode};

/// A FIFO list of JSON values stored under one key.
pub struct StoreList<T> {
    store: SharedStore,
    key: String,
    expiry: Expiry,
    _values: PhantomData<fn() -> T>,
}

impl<T> StoreList<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Bind a list to `key`.
    pub fn new(store: SharedStore, key: impl Into<String>, expiry: Expiry) -> Self {
        Self {
            store,
            key: key.into(),
            expiry,
            _values: PhantomData,
        }
    }

    /// Store key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append and reset the list's lifetime to the full window.
    pub async fn push(&self, value: &T) -> Result<()> {
        debug!(key = %self.key, "list push");
        let _ = self.store.rpush(&self.key, &encode(value)?).await?;
        self.expiry.reset(self.store.as_ref(), &self.key).await
    }

    /// Append without shortening or extending the list's remaining lifetime.
    pub async fn push_with_keep_expire(&self, value: &T) -> Result<()> {
        debug!(key = %self.key, "list push with keep expire");
        let prior = self.store.pttl(&self.key).await?;
        let _ = self.store.rpush(&self.key, &encode(value)?).await?;
        self.expiry.keep(self.store.as_ref(), &self.key, prior).await
    }

    /// Remove and return the oldest value.
    pub async fn shift(&self) -> Result<Option<T>> {
        debug!(key = %self.key, "list shift");
        self.store
            .lpop(&self.key)
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Oldest value without removing it.
    pub async fn first(&self) -> Result<Option<T>> {
        self.store
            .lindex(&self.key, 0)
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Number of values.
    pub async fn len(&self) -> Result<u64> {
        self.store.llen(&self.key).await
    }

    /// Whether the list holds no values.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// All values at this instant, oldest first.
    pub async fn snapshot(&self) -> Result<Vec<T>> {
        debug!(key = %self.key, "list snapshot");
        self.store
            .lrange(&self.key, 0, -1)
            .await?
            .iter()
            .map(|raw| decode(raw))
            .collect()
    }

    /// Delete the list.
    pub async fn clear(&self) -> Result<()> {
        debug!(key = %self.key, "list clear");
        let _ = self.store.del(&self.key).await?;
        Ok(())
    }
}
