//! The resilient channel.
//!
//! A [`Channel`] owns one side of a service link and keeps it alive across
//! transport failures. Three tasks cooperate:
//!
//! - the **supervisor** establishes links, reads incoming records and runs
//!   the reconnect policy;
//! - the **broadcaster** drains the outgoing queue head-first, removing an
//!   entry only after the transport acknowledges the write;
//! - the **dispatcher** hands decoded incoming messages to the handler one
//!   at a time.
//!
//! The attempt counter increments on every connect and resets to zero on
//! every acknowledged write. When a link ends with the counter at
//! `max_attempts`, the channel fails: the queue is cleared, every waiting
//! sender is rejected, and no further connects happen.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use relay_core::{EntryId, FaultReporter, Message, spawn_reported};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ChannelConfig;
use crate::errors::{ChannelError, Result, TransportError};
use crate::handler::IncomingHandler;
use crate::metrics::{
    CHANNEL_CONNECT_ATTEMPTS_TOTAL, CHANNEL_EXHAUSTED_TOTAL, CHANNEL_MESSAGES_RECEIVED_TOTAL,
    CHANNEL_MESSAGES_SENT_TOTAL,
};
use crate::queue::{OutgoingQueue, QueuedMessage};
use crate::role::{ChannelState, Role};
use crate::transport::{Connector, Duplex, RecordSink, RecordStream};

type Awaiter = oneshot::Sender<Result<()>>;

/// A live link: the write half and the token that ends it.
struct Link {
    sink: tokio::sync::Mutex<RecordSink>,
    token: CancellationToken,
}

struct Shared {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    queue: Arc<dyn OutgoingQueue>,
    awaiters: Mutex<HashMap<EntryId, Awaiter>>,
    link: Mutex<Option<Arc<Link>>>,
    attempt: AtomicU32,
    failed: AtomicBool,
    closed: AtomicBool,
    state: watch::Sender<ChannelState>,
    wake: Notify,
    stop: CancellationToken,
    reporter: FaultReporter,
}

impl Shared {
    fn service(&self) -> &str {
        &self.config.service
    }

    fn role(&self) -> Role {
        self.config.role
    }

    fn set_state(&self, next: ChannelState) {
        let _ = self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn exhausted(&self, attempt: u32) -> ChannelError {
        ChannelError::RetryExhausted {
            service: self.config.service.clone(),
            role: self.config.role,
            attempt,
        }
    }

    fn closed_error(&self) -> ChannelError {
        ChannelError::Closed {
            service: self.config.service.clone(),
            role: self.config.role,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(self.exhausted(self.attempt.load(Ordering::SeqCst)));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn resolve(&self, id: &EntryId, outcome: Result<()>) {
        if let Some(awaiter) = self.awaiters.lock().remove(id) {
            let _ = awaiter.send(outcome);
        }
    }

    fn reject_all(&self, make: impl Fn() -> ChannelError) {
        let awaiters: Vec<Awaiter> = self.awaiters.lock().drain().map(|(_, tx)| tx).collect();
        for awaiter in awaiters {
            let _ = awaiter.send(Err(make()));
        }
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        self.link
            .lock()
            .as_ref()
            .filter(|link| !link.token.is_cancelled())
            .cloned()
    }

    /// Enter the failed state. Returns the error reported for the channel.
    async fn fail(&self, attempt: u32) -> ChannelError {
        self.failed.store(true, Ordering::SeqCst);
        self.set_state(ChannelState::Failed);
        counter!(CHANNEL_EXHAUSTED_TOTAL, "service" => self.config.service.clone(), "role" => self.role().as_str())
            .increment(1);
        error!(service = %self.service(), role = %self.role(), attempt, "max retry reached");

        if let Err(err) = self.queue.clear().await {
            self.reporter.report_error("channel.fail", &err);
        }
        self.reject_all(|| self.exhausted(attempt));
        self.stop.cancel();
        self.exhausted(attempt)
    }
}

/// One side of a service link with an ack-gated outgoing queue.
pub struct Channel {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

impl Channel {
    /// Start a channel. Entries already in `queue` are sent first.
    pub fn open(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        queue: Arc<dyn OutgoingQueue>,
        handler: Arc<dyn IncomingHandler>,
        reporter: FaultReporter,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        let span = info_span!("channel", service = %config.service, role = %config.role);
        let shared = Arc::new(Shared {
            config,
            connector,
            queue,
            awaiters: Mutex::new(HashMap::new()),
            link: Mutex::new(None),
            attempt: AtomicU32::new(0),
            failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state,
            wake: Notify::new(),
            stop: CancellationToken::new(),
            reporter: reporter.clone(),
        });

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let tasks = vec![
            spawn_reported(
                "channel.supervisor",
                reporter,
                supervise(shared.clone(), incoming_tx).instrument(span.clone()),
            ),
            tokio::spawn(broadcast(shared.clone()).instrument(span.clone())),
            tokio::spawn(dispatch(shared.clone(), incoming_rx, handler).instrument(span)),
        ];
        // Persisted entries from a previous run go out first.
        shared.wake.notify_one();

        Self {
            shared,
            tasks: Mutex::new(tasks),
        }
    }

    /// Queue `message` and wait until the transport acknowledges it.
    ///
    /// # Errors
    ///
    /// [`ChannelError::RetryExhausted`] if the channel failed before the
    /// write was acknowledged, [`ChannelError::Closed`] if it was closed.
    pub async fn send(&self, message: Message) -> Result<()> {
        let shared = &self.shared;
        shared.check_open()?;

        let entry = QueuedMessage::new(message);
        let id = entry.id.clone();
        let (tx, rx) = oneshot::channel();
        let _ = shared.awaiters.lock().insert(id.clone(), tx);

        if let Err(err) = shared.check_open() {
            let _ = shared.awaiters.lock().remove(&id);
            return Err(err);
        }
        if let Err(err) = shared.queue.push(entry).await {
            let _ = shared.awaiters.lock().remove(&id);
            return Err(err.into());
        }
        if shared.failed.load(Ordering::SeqCst) {
            // Failed while the push was in flight; nothing may survive in the queue.
            let _ = shared.awaiters.lock().remove(&id);
            if let Err(err) = shared.queue.clear().await {
                shared.reporter.report_error("channel.send", &err);
            }
            return Err(shared.exhausted(shared.attempt.load(Ordering::SeqCst)));
        }
        shared.wake.notify_one();

        rx.await.unwrap_or_else(|_| Err(shared.closed_error()))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Connects since the last acknowledged write.
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// Entries waiting in the outgoing queue.
    ///
    /// # Errors
    ///
    /// Fails if the queue's store does.
    pub async fn pending(&self) -> Result<u64> {
        Ok(self.shared.queue.len().await?)
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Whether the channel has failed.
    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Stop every task, reject waiting senders and release the transport.
    ///
    /// Queued entries stay in the queue.
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(service = %shared.service(), role = %shared.role(), "closing channel");
        shared.stop.cancel();
        if let Some(link) = shared.link.lock().take() {
            link.token.cancel();
        }
        shared.reject_all(|| shared.closed_error());
        shared.set_state(ChannelState::Closed);
        shared.connector.shutdown().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in futures::future::join_all(tasks).await {
            if let Err(err) = task {
                warn!(error = %err, "channel task ended abnormally");
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

async fn supervise(shared: Arc<Shared>, incoming: mpsc::UnboundedSender<Message>) -> Result<()> {
    let config = &shared.config;
    let stop = shared.stop.clone();

    loop {
        let attempt = shared.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        shared.set_state(ChannelState::Connecting);
        counter!(CHANNEL_CONNECT_ATTEMPTS_TOTAL, "service" => config.service.clone(), "role" => config.role.as_str())
            .increment(1);

        let established = tokio::select! {
            () = stop.cancelled() => return Ok(()),
            result = tokio::time::timeout(config.ready_timeout, shared.connector.establish(attempt)) => {
                result.unwrap_or(Err(TransportError::NotReady(config.ready_timeout)))
            }
        };

        match established {
            Ok(Duplex { sink, mut stream }) => {
                let link = Arc::new(Link {
                    sink: tokio::sync::Mutex::new(sink),
                    token: CancellationToken::new(),
                });
                *shared.link.lock() = Some(link.clone());
                shared.set_state(ChannelState::Ready);
                info!(attempt, "link ready");
                shared.wake.notify_one();

                let reason = read(&shared, &link, &mut stream, &incoming).await;
                link.token.cancel();
                let _ = shared.link.lock().take();
                if stop.is_cancelled() {
                    return Ok(());
                }
                warn!(attempt, reason = %reason, "link lost");
            }
            Err(err) => {
                warn!(attempt, error = %err, "connect failed");
            }
        }

        let attempt = shared.attempt.load(Ordering::SeqCst);
        if attempt >= config.max_attempts {
            return Err(shared.fail(attempt).await);
        }

        shared.set_state(ChannelState::Draining);
        debug!(delay_ms = config.reconnect_delay.as_millis(), "reconnecting after delay");
        tokio::select! {
            () = stop.cancelled() => return Ok(()),
            () = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}

/// Read records until the link ends. Returns why it ended.
async fn read(
    shared: &Shared,
    link: &Link,
    stream: &mut RecordStream,
    incoming: &mpsc::UnboundedSender<Message>,
) -> String {
    loop {
        let next = tokio::select! {
            () = shared.stop.cancelled() => return "channel stopped".into(),
            () = link.token.cancelled() => return "write failed".into(),
            next = stream.next() => next,
        };
        match next {
            None => return "stream ended".into(),
            Some(Err(err)) => return err.to_string(),
            Some(Ok(record)) => match record.into_message() {
                Ok(message) => {
                    counter!(CHANNEL_MESSAGES_RECEIVED_TOTAL, "service" => shared.config.service.clone(), "role" => shared.role().as_str())
                        .increment(1);
                    let _ = incoming.send(message);
                }
                Err(err) => warn!(error = %err, "dropping undecodable record"),
            },
        }
    }
}

async fn broadcast(shared: Arc<Shared>) {
    loop {
        tokio::select! {
            () = shared.stop.cancelled() => return,
            () = shared.wake.notified() => drain(&shared).await,
        }
    }
}

/// Write queued entries head-first until the queue is empty or the link fails.
async fn drain(shared: &Shared) {
    loop {
        if shared.stop.is_cancelled() || shared.failed.load(Ordering::SeqCst) {
            return;
        }
        let Some(link) = shared.current_link() else {
            return;
        };
        let entry = match shared.queue.first().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(err) => {
                shared.reporter.report_error("channel.broadcast", &err);
                return;
            }
        };

        let record = match entry.message.to_wire() {
            Ok(record) => record,
            Err(err) => {
                warn!(id = %entry.id, error = %err, "dropping unencodable message");
                if !shift(shared).await {
                    return;
                }
                shared.resolve(&entry.id, Err(err.into()));
                continue;
            }
        };

        let sent = {
            let mut sink = link.sink.lock().await;
            tokio::select! {
                () = link.token.cancelled() => Err(TransportError::Closed),
                result = sink.send(record) => result,
            }
        };

        match sent {
            Ok(()) => {
                if !shift(shared).await {
                    return;
                }
                shared.attempt.store(0, Ordering::SeqCst);
                shared.resolve(&entry.id, Ok(()));
                counter!(CHANNEL_MESSAGES_SENT_TOTAL, "service" => shared.config.service.clone(), "role" => shared.role().as_str())
                    .increment(1);
                tokio::select! {
                    () = shared.stop.cancelled() => return,
                    () = tokio::time::sleep(shared.config.broadcast_pause) => {}
                }
            }
            Err(err) => {
                debug!(id = %entry.id, error = %err, "write failed, keeping entry queued");
                link.token.cancel();
                return;
            }
        }
    }
}

async fn shift(shared: &Shared) -> bool {
    match shared.queue.shift().await {
        Ok(_) => true,
        Err(err) => {
            shared.reporter.report_error("channel.broadcast", &err);
            false
        }
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    mut incoming: mpsc::UnboundedReceiver<Message>,
    handler: Arc<dyn IncomingHandler>,
) {
    loop {
        let message = tokio::select! {
            () = shared.stop.cancelled() => return,
            message = incoming.recv() => message,
        };
        match message {
            Some(message) => handler.handle(message).await,
            None => return,
        }
    }
}
