//! Settings type definitions.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a
//! partial settings file only needs the keys it changes.

mod channel;
mod fanout;
mod services;
mod store;

pub use channel::ChannelSettings;
pub use fanout::FanoutSettings;
pub use services::ServiceDefinition;
pub use store::StoreSettings;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for a relay process.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Process name, used in log output.
    pub name: String,
    /// Settings schema version.
    pub version: String,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Remote key-value store configuration.
    pub store: StoreSettings,
    /// Stream channel configuration.
    pub channel: ChannelSettings,
    /// Session fan-out configuration.
    pub fanout: FanoutSettings,
    /// Named service definitions.
    pub services: BTreeMap<String, ServiceDefinition>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            name: "relay".into(),
            version: "0.1.0".into(),
            logging: LoggingSettings::default(),
            store: StoreSettings::default(),
            channel: ChannelSettings::default(),
            fanout: FanoutSettings::default(),
            services: services::default_services(),
        }
    }
}

impl RelaySettings {
    /// Look up a service definition by name.
    pub fn service(&self, name: &str) -> Result<&ServiceDefinition> {
        self.services
            .get(name)
            .ok_or_else(|| SettingsError::UnknownService(name.to_owned()))
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit newline-delimited JSON instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_roundtrip() {
        let settings = RelaySettings::default();
        let json = serde_json::to_value(&settings).unwrap();
        let back: RelaySettings = serde_json::from_value(json).unwrap();
        assert_eq!(back.name, settings.name);
        assert_eq!(back.services.len(), settings.services.len());
        assert_eq!(back.channel.max_attempts, settings.channel.max_attempts);
    }

    #[test]
    fn empty_object_yields_defaults() {
        let settings: RelaySettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
        assert_eq!(settings.services.len(), 4);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert!(json["channel"].get("maxAttempts").is_some());
        assert!(json["store"].get("waitTimeoutMs").is_some());
        assert!(json["fanout"].get("onlineTtlSecs").is_some());
    }

    #[test]
    fn service_lookup() {
        let settings = RelaySettings::default();
        let def = settings.service("FooService").unwrap();
        assert_eq!(def.endpoint, "localhost:50051");
        assert_matches!(
            settings.service("Nope"),
            Err(SettingsError::UnknownService(name)) if name == "Nope"
        );
    }
}
