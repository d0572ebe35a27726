//! Service registry and channel ownership.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::FaultReporter;
use relay_settings::{ChannelSettings, RelaySettings, ServiceDefinition};
use relay_store::{ConnectionQueue, SharedStore};
use tracing::info;

use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::errors::{ChannelError, Result};
use crate::handler::IncomingHandler;
use crate::queue::{MemoryQueue, OutgoingQueue, QueuedMessage};
use crate::role::Role;
use crate::transport::Connector;
use crate::ws::{WsAcceptor, WsInitiator};

/// Opens channels for named services and keeps at most one per (service, role).
pub struct StreamHub {
    services: BTreeMap<String, ServiceDefinition>,
    channel: ChannelSettings,
    store: Option<SharedStore>,
    reporter: FaultReporter,
    channels: Mutex<HashMap<(String, Role), Arc<Channel>>>,
}

impl StreamHub {
    /// Build a hub from loaded settings.
    ///
    /// With a `store` and `persist_queue` enabled, outgoing queues live in
    /// the store and survive restarts.
    pub fn new(settings: &RelaySettings, store: Option<SharedStore>, reporter: FaultReporter) -> Self {
        Self {
            services: settings.services.clone(),
            channel: settings.channel.clone(),
            store,
            reporter,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a service definition.
    pub fn service(&self, name: &str) -> Result<&ServiceDefinition> {
        self.services
            .get(name)
            .ok_or_else(|| ChannelError::UnknownService(name.to_owned()))
    }

    /// Open a WebSocket channel for `service` in `role`.
    ///
    /// Any channel already open for the pair is closed first.
    pub async fn open<H: IncomingHandler>(
        &self,
        service: &str,
        role: Role,
        handler: H,
    ) -> Result<Arc<Channel>> {
        let definition = self.service(service)?;
        let connector: Arc<dyn Connector> = match role {
            Role::Initiator => Arc::new(WsInitiator::new(service, definition.endpoint.clone())),
            Role::Acceptor => Arc::new(WsAcceptor::new(service, definition.bind_addr())),
        };
        let queue = self.queue_for(service, role);
        let config = ChannelConfig::from_settings(service, role, &self.channel);
        Ok(self.open_with(config, connector, queue, Arc::new(handler)).await)
    }

    /// Open a channel over an explicit connector and queue.
    pub async fn open_with(
        &self,
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        queue: Arc<dyn OutgoingQueue>,
        handler: Arc<dyn IncomingHandler>,
    ) -> Arc<Channel> {
        let key = (config.service.clone(), config.role);
        let previous = self.channels.lock().remove(&key);
        if let Some(previous) = previous {
            info!(service = %key.0, role = %key.1, "replacing open channel");
            previous.close().await;
        }

        info!(service = %key.0, role = %key.1, "opening channel");
        let channel = Arc::new(Channel::open(
            config,
            connector,
            queue,
            handler,
            self.reporter.clone(),
        ));
        let _ = self.channels.lock().insert(key, channel.clone());
        channel
    }

    /// The open channel for a pair, if any.
    pub fn channel(&self, service: &str, role: Role) -> Option<Arc<Channel>> {
        self.channels.lock().get(&(service.to_owned(), role)).cloned()
    }

    /// Close every channel, acceptors first so their listeners are released.
    pub async fn shutdown(&self) {
        let mut channels: Vec<Arc<Channel>> = self.channels.lock().drain().map(|(_, c)| c).collect();
        channels.sort_by_key(|c| c.config().role != Role::Acceptor);
        info!(count = channels.len(), "shutting down channels");
        for channel in channels {
            channel.close().await;
        }
    }

    fn queue_for(&self, service: &str, role: Role) -> Arc<dyn OutgoingQueue> {
        match &self.store {
            Some(store) if self.channel.persist_queue => Arc::new(
                ConnectionQueue::<QueuedMessage>::for_service(store.clone(), service, role.side()),
            ),
            _ => Arc::new(MemoryQueue::new()),
        }
    }
}
