//! Store error types.

use std::time::Duration;

use relay_core::errors::{Classified, CodecError, ErrorCategory, ErrorSeverity};
use thiserror::Error;

/// Errors raised by store backends and the containers built on them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A command reached the server and failed.
    #[error("store command failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// No connection became available within the bounded wait.
    #[error("store await timeout after {0:?}")]
    Timeout(Duration),

    /// The connection task is gone and will never publish a connection.
    #[error("store connection task stopped")]
    Unavailable,

    /// A key holds a value of a different kind than the command expects.
    #[error("wrong kind of value at key {0}")]
    WrongType(String),

    /// A key pattern could not be compiled.
    #[error("invalid key pattern {pattern}: {source}")]
    InvalidPattern {
        /// The pattern as given.
        pattern: String,
        /// Why it was rejected.
        #[source]
        source: globset::Error,
    },

    /// A stored value could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl Classified for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Codec(_) => ErrorCategory::Codec,
            Self::InvalidPattern { .. } => ErrorCategory::Internal,
            _ => ErrorCategory::Store,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout(_) => ErrorSeverity::Transient,
            Self::Unavailable => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }
}
