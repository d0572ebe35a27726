//! # relay-core
//!
//! Shared vocabulary for the relay crates:
//!
//! - **Messages**: [`Message`] (typed JSON payload) and its wire form [`WireRecord`]
//! - **Store keys**: [`EntryId`] for outgoing queue entries, [`BacklogKey`] for backlog entries
//! - **Errors**: [`ErrorCategory`]/[`ErrorSeverity`] classification, [`Fault`] reports and the
//!   [`FaultReporter`] channel that fire-and-forget tasks report into
//! - **Tasks**: [`spawn_reported`] for spawning work whose failure must not be dropped
//! - **Logging**: `tracing` subscriber setup and a capture layer for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;
pub mod tasks;

pub use errors::{CodecError, ErrorCategory, ErrorSeverity, Fault, FaultReceiver, FaultReporter};
pub use ids::{BacklogKey, EntryId};
pub use message::{Message, WireRecord};
pub use tasks::spawn_reported;
