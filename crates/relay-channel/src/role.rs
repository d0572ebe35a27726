//! Channel role and lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of a service link a channel is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Dials the service endpoint.
    Initiator,
    /// Listens on the service endpoint and accepts one peer at a time.
    Acceptor,
}

impl Role {
    /// Lowercase name, used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Acceptor => "acceptor",
        }
    }

    /// Side name used in persistent queue keys.
    pub fn side(self) -> &'static str {
        match self {
            Self::Initiator => "client",
            Self::Acceptor => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a channel.
///
/// ```text
/// Connecting ──ready──▶ Ready ──terminal event──▶ Draining ──delay──▶ Connecting
///      │                                              │
///      └──────────── attempts exhausted ──────────────┴──▶ Failed
/// ```
///
/// `Closed` is entered from any state by an explicit close.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Establishing a link and waiting for it to become ready.
    Connecting,
    /// A live link exists; the outgoing queue is being drained.
    Ready,
    /// The link ended; waiting out the reconnect delay with the queue held.
    Draining,
    /// The reconnect budget is exhausted. Terminal.
    Failed,
    /// Closed by its owner. Terminal.
    Closed,
}

impl ChannelState {
    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names() {
        assert_eq!(Role::Initiator.to_string(), "initiator");
        assert_eq!(Role::Acceptor.side(), "server");
        assert_eq!(serde_json::to_string(&Role::Acceptor).unwrap(), r#""acceptor""#);
    }

    #[test]
    fn terminal_states() {
        assert!(ChannelState::Failed.is_terminal());
        assert!(ChannelState::Closed.is_terminal());
        assert!(!ChannelState::Draining.is_terminal());
    }
}
