//! TTL policies applied after every write to a container.
//!
//! Two policies exist:
//! - **reset**: the key gets the full configured window again.
//! - **keep**: the key keeps whatever lifetime it had before the write; a key
//!   that did not exist or had no expiry gets the full window.
//!
//! The keep policy reads the TTL before the write and restores it after, in
//! separate commands. Concurrent writers to the same key can interleave.

use std::time::Duration;

use relay_core::constants::TTL_NEVER;

use crate::backend::{RemoteStore, Ttl};
use crate::errors::Result;

/// Expiry window configured for a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// Entries never expire; every write clears any expiry.
    Never,
    /// Entries expire after this window.
    After(Duration),
}

impl Expiry {
    /// Build from a seconds setting. [`TTL_NEVER`] (or any value below one
    /// second) means [`Expiry::Never`].
    pub fn from_secs(secs: i64) -> Self {
        if secs == TTL_NEVER || secs <= 0 {
            Self::Never
        } else {
            Self::After(Duration::from_secs(secs as u64))
        }
    }

    /// Apply the reset policy to `key`.
    pub async fn reset(self, store: &dyn RemoteStore, key: &str) -> Result<()> {
        let _ = match self {
            Self::Never => store.persist(key).await?,
            Self::After(window) => store.expire(key, window.as_secs()).await?,
        };
        Ok(())
    }

    /// Apply the keep policy to `key`, given its TTL read before the write.
    pub async fn keep(self, store: &dyn RemoteStore, key: &str, prior: Ttl) -> Result<()> {
        let _ = match (self, prior) {
            (Self::Never, _) => store.persist(key).await?,
            (Self::After(_), Ttl::Millis(remaining)) if remaining > 0 => {
                store.pexpire(key, remaining).await?
            }
            (Self::After(window), _) => store.expire(key, window.as_secs()).await?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn sentinel_means_never() {
        assert_eq!(Expiry::from_secs(-1), Expiry::Never);
        assert_eq!(Expiry::from_secs(0), Expiry::Never);
        assert_eq!(Expiry::from_secs(300), Expiry::After(Duration::from_secs(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_full_window() {
        let store = MemoryStore::new();
        let _ = store.rpush("k", "a").await.unwrap();
        let _ = store.expire("k", 10).await.unwrap();
        tokio::time::advance(Duration::from_secs(7)).await;

        Expiry::After(Duration::from_secs(10)).reset(&store, "k").await.unwrap();
        assert_eq!(store.pttl("k").await.unwrap(), Ttl::Millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_preserves_remaining_lifetime() {
        let store = MemoryStore::new();
        let _ = store.rpush("k", "a").await.unwrap();
        let _ = store.expire("k", 10).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        let prior = store.pttl("k").await.unwrap();
        Expiry::After(Duration::from_secs(10)).keep(&store, "k", prior).await.unwrap();
        assert_eq!(store.pttl("k").await.unwrap(), Ttl::Millis(6_000));
    }

    #[tokio::test]
    async fn keep_gives_persistent_key_the_full_window() {
        let store = MemoryStore::new();
        let _ = store.rpush("k", "a").await.unwrap();
        let prior = store.pttl("k").await.unwrap();
        assert_eq!(prior, Ttl::Persistent);

        Expiry::After(Duration::from_secs(10)).keep(&store, "k", prior).await.unwrap();
        assert!(matches!(store.pttl("k").await.unwrap(), Ttl::Millis(ms) if ms > 9_000));
    }

    #[tokio::test]
    async fn never_clears_existing_expiry() {
        let store = MemoryStore::new();
        let _ = store.rpush("k", "a").await.unwrap();
        let _ = store.expire("k", 10).await.unwrap();
        Expiry::Never.keep(&store, "k", Ttl::Millis(10_000)).await.unwrap();
        assert_eq!(store.pttl("k").await.unwrap(), Ttl::Persistent);
    }
}
