//! Outgoing queues.
//!
//! The head of the queue is the next message to write. It is removed only
//! after the transport acknowledges it, so a link dying mid-write leaves it
//! in place for the next link.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{EntryId, Message};
use relay_store::{ConnectionQueue, StoreError};
use serde::{Deserialize, Serialize};

/// A queued outgoing message and the ID its sender waits on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Awaiter ID.
    pub id: EntryId,
    /// Message to deliver.
    pub message: Message,
}

impl QueuedMessage {
    /// Queue `message` under a fresh ID.
    pub fn new(message: Message) -> Self {
        Self {
            id: EntryId::new(),
            message,
        }
    }
}

/// FIFO of messages waiting for an acknowledged write.
#[async_trait]
pub trait OutgoingQueue: Send + Sync + 'static {
    /// Append to the tail.
    async fn push(&self, entry: QueuedMessage) -> Result<(), StoreError>;
    /// Head without removing it.
    async fn first(&self) -> Result<Option<QueuedMessage>, StoreError>;
    /// Remove the head.
    async fn shift(&self) -> Result<Option<QueuedMessage>, StoreError>;
    /// Number of queued entries.
    async fn len(&self) -> Result<u64, StoreError>;
    /// Drop every entry.
    async fn clear(&self) -> Result<(), StoreError>;
    /// IDs in queue order.
    async fn ids(&self) -> Result<Vec<EntryId>, StoreError>;
}

/// In-process queue. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<QueuedMessage>>,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutgoingQueue for MemoryQueue {
    async fn push(&self, entry: QueuedMessage) -> Result<(), StoreError> {
        self.entries.lock().push_back(entry);
        Ok(())
    }

    async fn first(&self) -> Result<Option<QueuedMessage>, StoreError> {
        Ok(self.entries.lock().front().cloned())
    }

    async fn shift(&self) -> Result<Option<QueuedMessage>, StoreError> {
        Ok(self.entries.lock().pop_front())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.entries.lock().len() as u64)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn ids(&self) -> Result<Vec<EntryId>, StoreError> {
        Ok(self.entries.lock().iter().map(|e| e.id.clone()).collect())
    }
}

#[async_trait]
impl OutgoingQueue for ConnectionQueue<QueuedMessage> {
    async fn push(&self, entry: QueuedMessage) -> Result<(), StoreError> {
        ConnectionQueue::push(self, &entry).await
    }

    async fn first(&self) -> Result<Option<QueuedMessage>, StoreError> {
        ConnectionQueue::first(self).await
    }

    async fn shift(&self) -> Result<Option<QueuedMessage>, StoreError> {
        ConnectionQueue::shift(self).await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        ConnectionQueue::len(self).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        ConnectionQueue::clear(self).await
    }

    async fn ids(&self) -> Result<Vec<EntryId>, StoreError> {
        Ok(self.snapshot().await?.into_iter().map(|e| e.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_store::MemoryStore;
    use serde_json::json;

    use super::*;

    async fn exercise(queue: &dyn OutgoingQueue) {
        let a = QueuedMessage::new(Message::new(json!("a")));
        let b = QueuedMessage::new(Message::new(json!("b")));
        queue.push(a.clone()).await.unwrap();
        queue.push(b.clone()).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(queue.first().await.unwrap(), Some(a.clone()));
        assert_eq!(queue.ids().await.unwrap(), vec![a.id.clone(), b.id.clone()]);
        assert_eq!(queue.shift().await.unwrap(), Some(a));
        assert_eq!(queue.first().await.unwrap(), Some(b));
        queue.clear().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.shift().await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_queue_is_fifo() {
        exercise(&MemoryQueue::new()).await;
    }

    #[tokio::test]
    async fn persistent_queue_is_fifo() {
        let store = Arc::new(MemoryStore::new());
        let queue: ConnectionQueue<QueuedMessage> =
            ConnectionQueue::for_service(store, "MessageService", "client");
        exercise(&queue).await;
    }

    #[tokio::test]
    async fn persistent_entries_survive_a_new_handle() {
        let store = Arc::new(MemoryStore::new());
        let first: ConnectionQueue<QueuedMessage> =
            ConnectionQueue::for_service(store.clone(), "MessageService", "server");
        let entry = QueuedMessage::new(Message::new(json!({"n": 1})));
        OutgoingQueue::push(&first, entry.clone()).await.unwrap();

        let reopened: ConnectionQueue<QueuedMessage> =
            ConnectionQueue::for_service(store, "MessageService", "server");
        assert_eq!(OutgoingQueue::first(&reopened).await.unwrap(), Some(entry));
    }
}
