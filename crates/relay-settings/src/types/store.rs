use serde::{Deserialize, Serialize};

use relay_core::constants::{
    DEFAULT_TTL_SECS, PAGE_SIZE, SCAN_COUNT, STORE_PING_INTERVAL, STORE_WAIT_TIMEOUT,
};

/// Remote key-value store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Connection URL (`redis://host:port`).
    pub url: String,
    /// Optional password sent on connect.
    pub password: Option<String>,
    /// How long a command waits for a live connection before failing.
    pub wait_timeout_ms: u64,
    /// Liveness ping interval.
    pub ping_interval_ms: u64,
    /// Reconnect backoff step; the delay is `step * attempt`.
    pub retry_step_ms: u64,
    /// Reconnect backoff cap.
    pub retry_max_ms: u64,
    /// Expiry window for list primitives in seconds (`-1` = never).
    pub list_ttl_secs: i64,
    /// Expiry window for map primitives in seconds (`-1` = never).
    pub map_ttl_secs: i64,
    /// Expiry window for set primitives in seconds (`-1` = never).
    pub set_ttl_secs: i64,
    /// Page size for paginated map iteration.
    pub page_size: usize,
    /// Count hint for cursor scans.
    pub scan_count: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            password: None,
            wait_timeout_ms: millis(STORE_WAIT_TIMEOUT),
            ping_interval_ms: millis(STORE_PING_INTERVAL),
            retry_step_ms: 50,
            retry_max_ms: 2_000,
            list_ttl_secs: DEFAULT_TTL_SECS,
            map_ttl_secs: DEFAULT_TTL_SECS,
            set_ttl_secs: DEFAULT_TTL_SECS,
            page_size: PAGE_SIZE,
            scan_count: SCAN_COUNT,
        }
    }
}

impl StoreSettings {
    /// Build a connection URL from a host and port.
    pub fn url_for(host: &str, port: u16) -> String {
        format!("redis://{host}:{port}")
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
