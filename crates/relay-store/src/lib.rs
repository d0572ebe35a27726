//! # relay-store
//!
//! Durable containers over a remote key-value store.
//!
//! - [`RemoteStore`]: the single-key primitives a backend must provide
//! - [`RedisStore`]: Redis backend with bounded waits for connectivity
//! - [`MemoryStore`]: in-process backend on the tokio clock
//! - [`StoreList`], [`StoreMap`], [`StoreSet`]: containers with TTL policies
//! - [`ConnectionQueue`]: FIFO queue that never expires
//!
//! Values are stored as JSON strings.

#![deny(unsafe_code)]

pub mod backend;
pub mod connection;
pub mod errors;
pub mod expiry;
pub mod list;
pub mod map;
pub mod memory;
pub mod redis_store;
pub mod set;

use std::sync::Arc;

use relay_core::errors::{CodecError, FaultReporter};
use relay_settings::StoreSettings;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{RemoteStore, SharedStore, Ttl};
pub use connection::{ConnectionQueue, connection_key};
pub use errors::{Result, StoreError};
pub use expiry::Expiry;
pub use list::StoreList;
pub use map::StoreMap;
pub use memory::MemoryStore;
pub use redis_store::{RedisConfig, RedisStore};
pub use set::StoreSet;

/// Open the Redis backend described by `settings`.
pub fn connect_redis(settings: &StoreSettings, reporter: FaultReporter) -> Result<SharedStore> {
    let store = RedisStore::connect(RedisConfig::from(settings), reporter)?;
    Ok(Arc::new(store))
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CodecError::Encode(e).into())
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| CodecError::Decode(e).into())
}
