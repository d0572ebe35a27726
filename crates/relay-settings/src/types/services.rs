use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named remote service reachable over a bidirectional stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceDefinition {
    /// `host:port` the initiator dials and the acceptor binds.
    pub endpoint: String,
    /// Stream methods the service exposes.
    pub methods: Vec<String>,
}

impl Default for ServiceDefinition {
    fn default() -> Self {
        Self {
            endpoint: "localhost:50051".into(),
            methods: vec!["Execute".into()],
        }
    }
}

impl ServiceDefinition {
    /// Build a definition with the single `Execute` method.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Bind address for an acceptor. `localhost` is normalized to the IPv4
    /// loopback so the listener and dialer agree on the address family.
    pub fn bind_addr(&self) -> String {
        match self.endpoint.strip_prefix("localhost:") {
            Some(port) => format!("127.0.0.1:{port}"),
            None => self.endpoint.clone(),
        }
    }
}

pub(crate) fn default_services() -> BTreeMap<String, ServiceDefinition> {
    [
        ("FooService", "localhost:50051"),
        ("BarService", "localhost:50052"),
        ("BazService", "localhost:50053"),
        ("MessageService", "localhost:50054"),
    ]
    .into_iter()
    .map(|(name, endpoint)| (name.to_owned(), ServiceDefinition::new(endpoint)))
    .collect()
}
