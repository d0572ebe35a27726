//! The transport seam.
//!
//! A [`Connector`] produces one [`Duplex`] link per connect attempt. The
//! channel owns everything above it: readiness timeout, reconnect policy,
//! queueing and ordering.
//!
//! A write is acknowledged when the sink's `send` future resolves `Ok`. The
//! end of the record stream, or an error item, is a terminal event for the
//! link.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use relay_core::WireRecord;

use crate::errors::TransportError;

/// Outgoing half of a link.
pub type RecordSink = Pin<Box<dyn Sink<WireRecord, Error = TransportError> + Send>>;

/// Incoming half of a link.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<WireRecord, TransportError>> + Send>>;

/// One established, ready link.
pub struct Duplex {
    /// Writes records to the peer.
    pub sink: RecordSink,
    /// Records arriving from the peer.
    pub stream: RecordStream,
}

impl Duplex {
    /// Assemble a link from its halves.
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<WireRecord, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<WireRecord, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Produces links for a channel.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a link. Resolves once the link is ready to carry records.
    ///
    /// `attempt` is the channel's attempt counter for this connect (1-based).
    async fn establish(&self, attempt: u32) -> Result<Duplex, TransportError>;

    /// Terminate the current link and release any listener.
    async fn shutdown(&self) {}
}
