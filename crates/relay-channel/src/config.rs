//! Per-channel configuration.

use std::time::Duration;

use relay_core::constants::{
    ACCEPTOR_READY_TIMEOUT, BROADCAST_PAUSE, INITIATOR_READY_TIMEOUT, MAX_CONNECT_ATTEMPTS,
    RECONNECT_DELAY,
};
use relay_settings::ChannelSettings;

use crate::role::Role;

/// Tuning for one channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Service name.
    pub service: String,
    /// Channel role.
    pub role: Role,
    /// Delay between a terminal event and the next connect.
    pub reconnect_delay: Duration,
    /// Connects allowed without an acknowledged send before failing.
    pub max_attempts: u32,
    /// Readiness window for a new link.
    pub ready_timeout: Duration,
    /// Pause between consecutive writes.
    pub broadcast_pause: Duration,
}

impl ChannelConfig {
    /// Defaults for `role`.
    pub fn new(service: impl Into<String>, role: Role) -> Self {
        Self {
            service: service.into(),
            role,
            reconnect_delay: RECONNECT_DELAY,
            max_attempts: MAX_CONNECT_ATTEMPTS,
            ready_timeout: match role {
                Role::Initiator => INITIATOR_READY_TIMEOUT,
                Role::Acceptor => ACCEPTOR_READY_TIMEOUT,
            },
            broadcast_pause: BROADCAST_PAUSE,
        }
    }

    /// Build from loaded settings.
    pub fn from_settings(service: impl Into<String>, role: Role, settings: &ChannelSettings) -> Self {
        let ready_ms = match role {
            Role::Initiator => settings.initiator_ready_timeout_ms,
            Role::Acceptor => settings.acceptor_ready_timeout_ms,
        };
        Self {
            service: service.into(),
            role,
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            max_attempts: settings.max_attempts.max(1),
            ready_timeout: Duration::from_millis(ready_ms),
            broadcast_pause: Duration::from_millis(settings.broadcast_pause_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_timeout_depends_on_role() {
        assert_eq!(
            ChannelConfig::new("FooService", Role::Initiator).ready_timeout,
            Duration::from_secs(1)
        );
        assert_eq!(
            ChannelConfig::new("FooService", Role::Acceptor).ready_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn from_settings_copies_values() {
        let settings = ChannelSettings {
            max_attempts: 3,
            reconnect_delay_ms: 50,
            ..ChannelSettings::default()
        };
        let config = ChannelConfig::from_settings("BarService", Role::Acceptor, &settings);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.reconnect_delay, Duration::from_millis(50));
        assert_eq!(config.ready_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        let settings = ChannelSettings {
            max_attempts: 0,
            ..ChannelSettings::default()
        };
        let config = ChannelConfig::from_settings("BarService", Role::Initiator, &settings);
        assert_eq!(config.max_attempts, 1);
    }
}
