//! Channel and transport errors.

use std::time::Duration;

use relay_core::errors::{Classified, CodecError, ErrorCategory, ErrorSeverity};
use relay_store::StoreError;
use thiserror::Error;

use crate::role::Role;

/// A transport-level failure. Every variant is a terminal event for the
/// current link and feeds the reconnect path.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link was closed or invalidated.
    #[error("link closed")]
    Closed,

    /// The peer could not be reached.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The peer refused the link at the protocol level.
    #[error("link rejected: {0}")]
    Rejected(String),

    /// The link did not become ready in time.
    #[error("link not ready after {0:?}")]
    NotReady(Duration),

    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// WebSocket protocol or I/O error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// A frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) => Self::Rejected(format!("HTTP {}", response.status())),
            WsError::Io(io) => Self::Refused(io.to_string()),
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::WebSocket(other.to_string()),
        }
    }
}

impl From<axum::Error> for TransportError {
    fn from(err: axum::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl Classified for TransportError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected(_) => ErrorCategory::Protocol,
            Self::Codec(_) => ErrorCategory::Codec,
            _ => ErrorCategory::Transport,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Transient
    }
}

/// Errors surfaced to callers of a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The reconnect budget ran out; the channel is permanently failed.
    #[error("max retry reached service={service} role={role} attempt={attempt}")]
    RetryExhausted {
        /// Service name.
        service: String,
        /// Channel role.
        role: Role,
        /// Attempt counter when the channel failed.
        attempt: u32,
    },

    /// The channel was closed before the message was acknowledged.
    #[error("channel closed service={service} role={role}")]
    Closed {
        /// Service name.
        service: String,
        /// Channel role.
        role: Role,
    },

    /// No service is defined under this name.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// The message could not be encoded for the wire.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The outgoing queue's store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

impl Classified for ChannelError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::RetryExhausted { .. } => ErrorCategory::Exhausted,
            Self::Closed { .. } => ErrorCategory::Transport,
            Self::UnknownService(_) => ErrorCategory::Internal,
            Self::Codec(_) => ErrorCategory::Codec,
            Self::Store(_) => ErrorCategory::Store,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RetryExhausted { .. } => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }

    fn service(&self) -> Option<&str> {
        match self {
            Self::RetryExhausted { service, .. } | Self::Closed { service, .. } => Some(service),
            Self::UnknownService(service) => Some(service),
            _ => None,
        }
    }

    fn attempt(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }
}
