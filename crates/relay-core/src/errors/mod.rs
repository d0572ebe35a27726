//! Error taxonomy shared by the relay crates.
//!
//! Each crate owns its concrete error enum (`StoreError`, `ChannelError`,
//! `FanoutError`); this module provides what they have in common:
//!
//! - [`ErrorCategory`] / [`ErrorSeverity`]: classification for logging and retry decisions
//! - [`Classified`]: implemented by every crate error so it can be attributed
//! - [`CodecError`]: message encoding/decoding failures
//! - [`Fault`], [`FaultReporter`], [`FaultReceiver`]: the collected error channel that
//!   background tasks report into

mod fault;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fault::{Fault, FaultReceiver, FaultReporter};

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Broad error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport dropped, ended, errored or never became ready.
    Transport,
    /// Peer violated the link protocol (e.g. duplicate connection).
    Protocol,
    /// Reconnect budget exhausted.
    Exhausted,
    /// Remote store failed or was unreachable.
    Store,
    /// Encoding or decoding failed.
    Codec,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Exhausted => "exhausted",
            Self::Store => "store",
            Self::Codec => "codec",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// How bad an error is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Recovered internally (reconnect, retry).
    Transient,
    /// Surfaced to the caller.
    Error,
    /// The component cannot continue.
    Fatal,
}

/// An error that can be attributed before it is reported.
///
/// The default attribution is empty; errors that know which channel or
/// session they belong to override the accessors.
pub trait Classified: std::error::Error {
    /// Error category.
    fn category(&self) -> ErrorCategory;

    /// Error severity.
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    /// Service the error belongs to, if any.
    fn service(&self) -> Option<&str> {
        None
    }

    /// Session the error belongs to, if any.
    fn session_id(&self) -> Option<&str> {
        None
    }

    /// Channel attempt counter at the time of the error, if any.
    fn attempt(&self) -> Option<u32> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CodecError
// ─────────────────────────────────────────────────────────────────────────────

/// Message encoding/decoding failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serializing a value failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    /// Parsing a value failed.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Classified for CodecError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Codec
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
