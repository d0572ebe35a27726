use serde::{Deserialize, Serialize};

use relay_core::constants::{BACKLOG_POLL_INTERVAL, DEFAULT_TTL_SECS, ONLINE_TTL_SECS};

/// Session fan-out configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// Lifetime of a session's online marker.
    pub online_ttl_secs: u64,
    /// Expiry window for per-session backlogs (`-1` = never).
    pub backlog_ttl_secs: i64,
    /// How often an attached session re-checks its backlog and refreshes its marker.
    pub backlog_poll_interval_ms: u64,
    /// Key namespace for backlogs and online markers.
    pub emit_namespace: String,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            online_ttl_secs: ONLINE_TTL_SECS,
            backlog_ttl_secs: DEFAULT_TTL_SECS,
            backlog_poll_interval_ms: u64::try_from(BACKLOG_POLL_INTERVAL.as_millis())
                .unwrap_or(u64::MAX),
            emit_namespace: "emit".into(),
        }
    }
}
