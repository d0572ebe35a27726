//! Insertion-ordered map.
//!
//! Values live in a hash at `<base>:map`; insertion order lives in a list at
//! `<base>:order`. The two are written by separate commands, so a reader can
//! observe an order entry whose value is not there (yet, or any more). Such
//! entries are skipped and logged, never treated as errors.

use std::marker::PhantomData;

use futures::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::backend::SharedStore;
use crate::errors::Result;
use crate::expiry::Expiry;
use crate::{decode, encode};

/// A key→value map that remembers insertion order.
pub struct StoreMap<T> {
    store: SharedStore,
    base: String,
    map_key: String,
    order_key: String,
    expiry: Expiry,
    page_size: usize,
    _values: PhantomData<fn() -> T>,
}

impl<T> StoreMap<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Bind a map to `base`, iterating in pages of `page_size`.
    pub fn new(store: SharedStore, base: impl Into<String>, expiry: Expiry, page_size: usize) -> Self {
        let base = base.into();
        Self {
            store,
            map_key: format!("{base}:map"),
            order_key: format!("{base}:order"),
            base,
            expiry,
            page_size: page_size.max(1),
            _values: PhantomData,
        }
    }

    /// Base key.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Insert or overwrite, resetting both keys to the full window.
    pub async fn set(&self, key: &str, value: &T) -> Result<()> {
        debug!(base = %self.base, key, "map set");
        let _ = self.store.hset(&self.map_key, key, &encode(value)?).await?;
        let _ = self.append_order(key).await?;
        let store = self.store.as_ref();
        self.expiry.reset(store, &self.map_key).await?;
        self.expiry.reset(store, &self.order_key).await
    }

    /// Insert or overwrite, keeping the map's remaining lifetime.
    pub async fn set_with_keep_expire(&self, key: &str, value: &T) -> Result<()> {
        debug!(base = %self.base, key, "map set with keep expire");
        let store = self.store.as_ref();
        let prior = store.pttl(&self.map_key).await?;
        let _ = store.hset(&self.map_key, key, &encode(value)?).await?;
        self.expiry.keep(store, &self.map_key, prior).await?;
        if self.append_order(key).await? {
            self.expiry.keep(store, &self.order_key, prior).await?;
        }
        Ok(())
    }

    async fn append_order(&self, key: &str) -> Result<bool> {
        if self.store.lpos(&self.order_key, key).await?.is_some() {
            return Ok(false);
        }
        let _ = self.store.rpush(&self.order_key, key).await?;
        Ok(true)
    }

    /// Value stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        self.store
            .hget(&self.map_key, key)
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Whether `key` has a value.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.store.hexists(&self.map_key, key).await
    }

    /// Remove `key` from both the values and the order.
    pub async fn delete(&self, key: &str) -> Result<()> {
        debug!(base = %self.base, key, "map delete");
        let _ = self.store.hdel(&self.map_key, key).await?;
        let _ = self.store.lrem(&self.order_key, 0, key).await?;
        Ok(())
    }

    /// Oldest entry without removing it. Order entries with no value are
    /// dropped along the way.
    pub async fn first(&self) -> Result<Option<(String, T)>> {
        while let Some(key) = self.store.lindex(&self.order_key, 0).await? {
            if let Some(value) = self.get(&key).await? {
                return Ok(Some((key, value)));
            }
            warn!(base = %self.base, key = %key, "map first dropped key with missing value");
            let _ = self.store.lrem(&self.order_key, 1, &key).await?;
        }
        Ok(None)
    }

    /// Remove and return the oldest entry. Order entries with no value are
    /// dropped along the way.
    pub async fn shift(&self) -> Result<Option<(String, T)>> {
        debug!(base = %self.base, "map shift");
        while let Some(key) = self.store.lpop(&self.order_key).await? {
            let raw = self.store.hget(&self.map_key, &key).await?;
            let _ = self.store.hdel(&self.map_key, &key).await?;
            match raw {
                Some(raw) => return Ok(Some((key, decode(&raw)?))),
                None => warn!(base = %self.base, key = %key, "map shift skipped key with missing value"),
            }
        }
        Ok(None)
    }

    /// Number of ordered keys.
    pub async fn size(&self) -> Result<u64> {
        self.store.llen(&self.order_key).await
    }

    /// Delete both keys.
    pub async fn clear(&self) -> Result<()> {
        debug!(base = %self.base, "map clear");
        let _ = self.store.del(&self.map_key).await?;
        let _ = self.store.del(&self.order_key).await?;
        Ok(())
    }

    async fn page(&self, start: usize) -> Result<Vec<String>> {
        let stop = start + self.page_size - 1;
        self.store
            .lrange(&self.order_key, start as i64, stop as i64)
            .await
    }

    /// Entries in insertion order, fetched one page at a time.
    pub fn entries(&self) -> impl Stream<Item = Result<(String, T)>> + '_ {
        async_stream::try_stream! {
            let mut start = 0;
            loop {
                let keys = self.page(start).await?;
                if keys.is_empty() {
                    break;
                }
                for key in keys {
                    match self.store.hget(&self.map_key, &key).await? {
                        Some(raw) => yield (key, decode(&raw)?),
                        None => warn!(base = %self.base, key = %key, "map iterate missing value"),
                    }
                }
                start += self.page_size;
            }
        }
    }

    /// Keys in insertion order, fetched one page at a time.
    pub fn keys(&self) -> impl Stream<Item = Result<String>> + '_ {
        async_stream::try_stream! {
            let mut start = 0;
            loop {
                let keys = self.page(start).await?;
                if keys.is_empty() {
                    break;
                }
                for key in keys {
                    yield key;
                }
                start += self.page_size;
            }
        }
    }

    /// Values in insertion order, fetched one page at a time.
    pub fn values(&self) -> impl Stream<Item = Result<T>> + '_ {
        async_stream::try_stream! {
            let mut start = 0;
            loop {
                let keys = self.page(start).await?;
                if keys.is_empty() {
                    break;
                }
                for key in keys {
                    match self.store.hget(&self.map_key, &key).await? {
                        Some(raw) => yield decode(&raw)?,
                        None => warn!(base = %self.base, key = %key, "map iterate values missing value"),
                    }
                }
                start += self.page_size;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::TryStreamExt;
    use relay_core::logging::capture_logs;
    use serde_json::{Value, json};
    use tracing::Level;

    use super::*;
    use crate::backend::{RemoteStore, Ttl};
    use crate::memory::MemoryStore;

    const WINDOW: Duration = Duration::from_secs(300);

    fn map(store: &Arc<MemoryStore>, page_size: usize) -> StoreMap<Value> {
        StoreMap::new(store.clone(), "emit__abc", Expiry::After(WINDOW), page_size)
    }

    #[tokio::test]
    async fn preserves_insertion_order_without_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        map.set("b", &json!(1)).await.unwrap();
        map.set("a", &json!(2)).await.unwrap();
        map.set("b", &json!(3)).await.unwrap();

        let keys: Vec<String> = map.keys().try_collect().await.unwrap();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(map.size().await.unwrap(), 2);
        assert_eq!(map.get("b").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn delete_removes_value_and_order() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        map.set("a", &json!(1)).await.unwrap();
        map.set("b", &json!(2)).await.unwrap();
        map.delete("a").await.unwrap();

        assert!(!map.has("a").await.unwrap());
        assert_eq!(map.size().await.unwrap(), 1);
        assert_eq!(map.first().await.unwrap(), Some(("b".into(), json!(2))));
    }

    #[tokio::test]
    async fn shift_pops_oldest_pair() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        map.set("a", &json!({"x": 1})).await.unwrap();
        map.set("b", &json!({"x": 2})).await.unwrap();

        assert_eq!(map.shift().await.unwrap(), Some(("a".into(), json!({"x": 1}))));
        assert!(!map.has("a").await.unwrap());
        assert_eq!(map.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn shift_skips_orphaned_order_entries() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        let _ = store.rpush("emit__abc:order", "ghost").await.unwrap();
        map.set("real", &json!(7)).await.unwrap();

        assert_eq!(map.shift().await.unwrap(), Some(("real".into(), json!(7))));
        assert_eq!(map.shift().await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_drops_orphaned_head() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        let _ = store.rpush("emit__abc:order", "ghost").await.unwrap();
        map.set("real", &json!(7)).await.unwrap();

        assert_eq!(map.first().await.unwrap(), Some(("real".into(), json!(7))));
        assert_eq!(map.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn iteration_spans_pages() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 3);
        for i in 0..8 {
            map.set(&format!("k{i}"), &json!(i)).await.unwrap();
        }
        let values: Vec<Value> = map.values().try_collect().await.unwrap();
        assert_eq!(values, (0..8).map(|i| json!(i)).collect::<Vec<_>>());
        let entries: Vec<(String, Value)> = map.entries().try_collect().await.unwrap();
        assert_eq!(entries[7], ("k7".into(), json!(7)));
    }

    #[tokio::test]
    async fn iteration_skips_and_logs_missing_values() {
        let (logs, _guard) = capture_logs();
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        map.set("a", &json!(1)).await.unwrap();
        let _ = store.rpush("emit__abc:order", "ghost").await.unwrap();
        map.set("b", &json!(2)).await.unwrap();

        let entries: Vec<(String, Value)> = map.entries().try_collect().await.unwrap();
        assert_eq!(entries, vec![("a".into(), json!(1)), ("b".into(), json!(2))]);

        let skipped = logs
            .events()
            .into_iter()
            .find(|e| e.level == Level::WARN && e.message.contains("missing value"))
            .expect("skip should be logged");
        assert_eq!(skipped.field("key"), Some("ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_expire_applies_to_both_keys() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        map.set_with_keep_expire("a", &json!(1)).await.unwrap();
        assert_eq!(store.pttl("emit__abc:map").await.unwrap(), Ttl::Millis(300_000));
        assert_eq!(store.pttl("emit__abc:order").await.unwrap(), Ttl::Millis(300_000));

        tokio::time::advance(Duration::from_secs(120)).await;
        map.set_with_keep_expire("b", &json!(2)).await.unwrap();
        assert_eq!(store.pttl("emit__abc:map").await.unwrap(), Ttl::Millis(180_000));
        assert_eq!(store.pttl("emit__abc:order").await.unwrap(), Ttl::Millis(180_000));

        map.set("c", &json!(3)).await.unwrap();
        assert_eq!(store.pttl("emit__abc:map").await.unwrap(), Ttl::Millis(300_000));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_vanish_after_window() {
        let store = Arc::new(MemoryStore::new());
        let map = map(&store, 100);
        map.set("a", &json!(1)).await.unwrap();
        tokio::time::advance(WINDOW).await;
        assert_eq!(map.size().await.unwrap(), 0);
        assert_eq!(map.get("a").await.unwrap(), None);
    }
}
