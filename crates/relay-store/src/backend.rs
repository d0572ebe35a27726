//! The remote store seam.
//!
//! [`RemoteStore`] lists exactly the single-key primitives the containers
//! and the fan-out need. Every operation is atomic on its own key; nothing
//! here spans keys.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;

/// Remaining lifetime of a key as reported by `PTTL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist (`-2`).
    Missing,
    /// The key exists without an expiry (`-1`).
    Persistent,
    /// The key expires in this many milliseconds.
    Millis(u64),
}

impl Ttl {
    /// Decode a raw `PTTL` reply.
    pub fn from_reply(raw: i64) -> Self {
        match raw {
            -2 => Self::Missing,
            n if n < 0 => Self::Persistent,
            n => Self::Millis(n as u64),
        }
    }
}

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn RemoteStore>;

/// Single-key primitives over a remote key-value store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // ── Lists ───────────────────────────────────────────────────────

    /// Append to the tail; returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<u64>;
    /// Pop from the head.
    async fn lpop(&self, key: &str) -> Result<Option<String>>;
    /// List length.
    async fn llen(&self, key: &str) -> Result<u64>;
    /// Element at `index` (negative counts from the tail).
    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>>;
    /// Elements between `start` and `stop` inclusive.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    /// Remove up to `count` occurrences of `value` (`0` = all).
    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64>;
    /// Index of the first occurrence of `value`.
    async fn lpos(&self, key: &str, value: &str) -> Result<Option<u64>>;

    // ── Hashes ──────────────────────────────────────────────────────

    /// Set a field; returns true if the field is new.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;
    /// Read a field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    /// Delete a field; returns true if it existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;
    /// Whether a field exists.
    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;

    // ── Sets ────────────────────────────────────────────────────────

    /// Add a member; returns true if it was not present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;
    /// Remove a member; returns true if it was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool>;
    /// Whether `member` belongs to the set.
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    /// Set cardinality.
    async fn scard(&self, key: &str) -> Result<u64>;
    /// One step of an incremental scan. A returned cursor of `0` ends the scan.
    async fn sscan(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)>;

    // ── Expiry ──────────────────────────────────────────────────────

    /// Expire `key` in `secs` seconds.
    async fn expire(&self, key: &str, secs: u64) -> Result<bool>;
    /// Expire `key` in `millis` milliseconds.
    async fn pexpire(&self, key: &str, millis: u64) -> Result<bool>;
    /// Remaining lifetime of `key`.
    async fn pttl(&self, key: &str) -> Result<Ttl>;
    /// Drop the expiry of `key`.
    async fn persist(&self, key: &str) -> Result<bool>;

    // ── Plain keys ──────────────────────────────────────────────────

    /// Keys matching a glob `pattern`.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    /// Set a string value that expires in `secs` seconds.
    async fn set_ex(&self, key: &str, value: &str, secs: u64) -> Result<()>;
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Delete a key of any kind; returns true if it existed.
    async fn del(&self, key: &str) -> Result<bool>;
    /// Liveness check.
    async fn ping(&self) -> Result<()>;
}
