//! Incoming message handlers.

use std::future::Future;

use async_trait::async_trait;
use relay_core::Message;

/// Receives decoded incoming messages, one at a time, in arrival order.
#[async_trait]
pub trait IncomingHandler: Send + Sync + 'static {
    /// Handle one message. The next message is not delivered until this returns.
    async fn handle(&self, message: Message);
}

#[async_trait]
impl<F, Fut> IncomingHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: Message) {
        (self)(message).await;
    }
}

/// Handler that discards everything.
pub struct Discard;

#[async_trait]
impl IncomingHandler for Discard {
    async fn handle(&self, _message: Message) {}
}
