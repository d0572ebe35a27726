//! Unordered membership set.

use futures::Stream;
use tracing::debug;

use crate::backend::SharedStore;
use crate::errors::Result;
use crate::expiry::Expiry;

/// A set of string members stored under one key.
pub struct StoreSet {
    store: SharedStore,
    key: String,
    expiry: Expiry,
    scan_count: usize,
}

impl StoreSet {
    /// Bind a set to `key`, scanning `scan_count` members per step.
    pub fn new(store: SharedStore, key: impl Into<String>, expiry: Expiry, scan_count: usize) -> Self {
        Self {
            store,
            key: key.into(),
            expiry,
            scan_count: scan_count.max(1),
        }
    }

    /// Store key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Add a member and reset the set's lifetime.
    pub async fn add(&self, member: &str) -> Result<()> {
        debug!(key = %self.key, member, "set add");
        let _ = self.store.sadd(&self.key, member).await?;
        self.expiry.reset(self.store.as_ref(), &self.key).await
    }

    /// Add a member, keeping the set's remaining lifetime.
    pub async fn add_with_keep_expire(&self, member: &str) -> Result<()> {
        debug!(key = %self.key, member, "set add with keep expire");
        let prior = self.store.pttl(&self.key).await?;
        let _ = self.store.sadd(&self.key, member).await?;
        self.expiry.keep(self.store.as_ref(), &self.key, prior).await
    }

    /// Remove a member.
    pub async fn remove(&self, member: &str) -> Result<()> {
        debug!(key = %self.key, member, "set remove");
        let _ = self.store.srem(&self.key, member).await?;
        Ok(())
    }

    /// Whether `member` is present.
    pub async fn has(&self, member: &str) -> Result<bool> {
        self.store.sismember(&self.key, member).await
    }

    /// Number of members.
    pub async fn size(&self) -> Result<u64> {
        self.store.scard(&self.key).await
    }

    /// Delete the set.
    pub async fn clear(&self) -> Result<()> {
        let _ = self.store.del(&self.key).await?;
        Ok(())
    }

    /// Members, fetched by incremental cursor scan.
    ///
    /// Members added or removed during the scan may or may not be observed.
    pub fn members(&self) -> impl Stream<Item = Result<String>> + '_ {
        async_stream::try_stream! {
            let mut cursor = 0;
            loop {
                let (next, chunk) = self.store.sscan(&self.key, cursor, self.scan_count).await?;
                for member in chunk {
                    yield member;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::TryStreamExt;

    use super::*;
    use crate::backend::{RemoteStore, Ttl};
    use crate::memory::MemoryStore;

    fn set(store: &Arc<MemoryStore>) -> StoreSet {
        StoreSet::new(store.clone(), "members", Expiry::After(Duration::from_secs(300)), 4)
    }

    #[tokio::test]
    async fn membership() {
        let store = Arc::new(MemoryStore::new());
        let set = set(&store);
        set.add("a").await.unwrap();
        set.add("a").await.unwrap();
        set.add("b").await.unwrap();
        assert_eq!(set.size().await.unwrap(), 2);
        assert!(set.has("a").await.unwrap());
        set.remove("a").await.unwrap();
        assert!(!set.has("a").await.unwrap());
    }

    #[tokio::test]
    async fn scan_yields_every_member_once() {
        let store = Arc::new(MemoryStore::new());
        let set = set(&store);
        for i in 0..11 {
            set.add(&format!("m{i}")).await.unwrap();
        }
        let members: Vec<String> = set.members().try_collect().await.unwrap();
        let unique: BTreeSet<_> = members.iter().cloned().collect();
        assert_eq!(members.len(), 11);
        assert_eq!(unique.len(), 11);
    }

    #[tokio::test]
    async fn scan_of_missing_set_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let members: Vec<String> = set(&store).members().try_collect().await.unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_policies() {
        let store = Arc::new(MemoryStore::new());
        let set = set(&store);
        set.add("a").await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        set.add_with_keep_expire("b").await.unwrap();
        assert_eq!(store.pttl("members").await.unwrap(), Ttl::Millis(250_000));
        set.add("c").await.unwrap();
        assert_eq!(store.pttl("members").await.unwrap(), Ttl::Millis(300_000));
    }
}
