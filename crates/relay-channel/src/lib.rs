//! # relay-channel
//!
//! Resilient bidirectional message channels between two processes.
//!
//! - [`Channel`]: one side of a service link with an ack-gated outgoing
//!   queue, bounded reconnects and sequential incoming delivery
//! - [`Connector`]/[`Duplex`]: the transport seam, with WebSocket
//!   ([`WsInitiator`], [`WsAcceptor`]) and in-process ([`MemoryHub`]) transports
//! - [`OutgoingQueue`]: in-memory or store-backed outgoing queues
//! - [`StreamHub`]: opens channels for named services, one per (service, role)
//! - [`ShutdownCoordinator`]: signal-driven shutdown

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod errors;
pub mod handler;
pub mod hub;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod role;
pub mod shutdown;
pub mod transport;
pub mod ws;

pub use channel::Channel;
pub use config::ChannelConfig;
pub use errors::{ChannelError, Result, TransportError};
pub use handler::{Discard, IncomingHandler};
pub use hub::StreamHub;
pub use memory::{MemoryConnector, MemoryHub};
pub use queue::{MemoryQueue, OutgoingQueue, QueuedMessage};
pub use role::{ChannelState, Role};
pub use shutdown::ShutdownCoordinator;
pub use transport::{Connector, Duplex, RecordSink, RecordStream};
pub use ws::{WsAcceptor, WsInitiator};
