use serde::{Deserialize, Serialize};

use relay_core::constants::{
    ACCEPTOR_READY_TIMEOUT, BROADCAST_PAUSE, INITIATOR_READY_TIMEOUT, MAX_CONNECT_ATTEMPTS,
    RECONNECT_DELAY,
};

/// Stream channel configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Delay between a terminal stream event and the next connect attempt.
    pub reconnect_delay_ms: u64,
    /// Consecutive attempts without an acknowledged send before the channel fails.
    pub max_attempts: u32,
    /// How long an initiator waits for its outbound stream to become ready.
    pub initiator_ready_timeout_ms: u64,
    /// How long an acceptor waits for a peer to open its inbound stream.
    pub acceptor_ready_timeout_ms: u64,
    /// Pause between consecutive broadcast writes.
    pub broadcast_pause_ms: u64,
    /// Keep the outgoing queue in the remote store instead of process memory.
    pub persist_queue: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: as_ms(RECONNECT_DELAY),
            max_attempts: MAX_CONNECT_ATTEMPTS,
            initiator_ready_timeout_ms: as_ms(INITIATOR_READY_TIMEOUT),
            acceptor_ready_timeout_ms: as_ms(ACCEPTOR_READY_TIMEOUT),
            broadcast_pause_ms: as_ms(BROADCAST_PAUSE),
            persist_queue: false,
        }
    }
}

fn as_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ChannelSettings::default();
        assert_eq!(c.reconnect_delay_ms, 1_000);
        assert_eq!(c.max_attempts, 15);
        assert_eq!(c.initiator_ready_timeout_ms, 1_000);
        assert_eq!(c.acceptor_ready_timeout_ms, 60_000);
        assert_eq!(c.broadcast_pause_ms, 10);
        assert!(!c.persist_queue);
    }

    #[test]
    fn partial_override() {
        let c: ChannelSettings = serde_json::from_str(r#"{"maxAttempts": 3}"#).unwrap();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.reconnect_delay_ms, 1_000);
    }
}
