//! # relay-fanout
//!
//! Delivers payloads to many named sessions, within one process and across
//! processes that share a store.
//!
//! - [`ConnectionRegistry`]: per-session workers with ordered delivery and a
//!   one-shot disconnect notification
//! - [`DurableFanOut`]: routes payloads for sessions not attached locally
//!   into per-session backlogs, drained when the session attaches

#![deny(unsafe_code)]

pub mod durable;
pub mod errors;
pub mod registry;

pub use durable::DurableFanOut;
pub use errors::{FanoutError, Result};
pub use registry::{Backlog, ConnectionRegistry, Deliver};
