//! Per-session delivery within one process.
//!
//! Each attached session gets a worker task fed by an unbounded queue, so
//! delivery is sequential per session and concurrent across sessions. When a
//! session's [`Deliver`] returns `false` the worker tears the session down:
//! its bookkeeping is removed and the disconnect callbacks registered for
//! that id fire once, before any undelivered payload is stashed.
//!
//! A worker may also own a [`Backlog`]. The backlog is drained oldest-first
//! before live payloads and again on every poll tick; an entry is
//! acknowledged only after a successful delivery. Live payloads that were
//! never delivered are stashed back into the backlog on teardown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{FaultReporter, spawn_reported};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Hands one payload to a session's transport. Returns `false` once the
/// transport is gone.
#[async_trait]
pub trait Deliver<P>: Send + Sync + 'static {
    /// Deliver `payload`.
    async fn deliver(&self, payload: P) -> bool;
}

#[async_trait]
impl<P, F, Fut> Deliver<P> for F
where
    P: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn deliver(&self, payload: P) -> bool {
        (self)(payload).await
    }
}

/// Durable per-session buffer drained by the session's worker.
#[async_trait]
pub trait Backlog<P>: Send + Sync + 'static {
    /// Oldest buffered entry and its key, without removing it.
    async fn next(&self) -> Result<Option<(String, P)>>;

    /// Remove a delivered entry.
    async fn ack(&self, key: &str) -> Result<()>;

    /// Buffer payloads that could not be delivered.
    async fn stash(&self, payloads: Vec<P>) -> Result<()>;

    /// Called on every poll tick while the session is attached.
    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }
}

type DisconnectFn = Box<dyn FnOnce() + Send>;

struct Session<P> {
    deliver: Arc<dyn Deliver<P>>,
    tx: mpsc::UnboundedSender<P>,
    generation: u64,
    stop: CancellationToken,
}

struct Inner<P> {
    sessions: Mutex<HashMap<String, Session<P>>>,
    disconnects: Mutex<HashMap<String, Vec<DisconnectFn>>>,
    generations: AtomicU64,
    reporter: FaultReporter,
}

impl<P: Send + 'static> Inner<P> {
    fn deliver_for(&self, id: &str, generation: u64) -> Option<Arc<dyn Deliver<P>>> {
        self.sessions
            .lock()
            .get(id)
            .filter(|s| s.generation == generation)
            .map(|s| s.deliver.clone())
    }

    /// Remove the session and take its disconnect callbacks under both locks.
    /// Callbacks registered after this returns belong to the next attachment.
    fn take_session(&self, id: &str, generation: u64) -> Vec<DisconnectFn> {
        let mut disconnects = self.disconnects.lock();
        let mut sessions = self.sessions.lock();
        if sessions.get(id).is_none_or(|s| s.generation != generation) {
            return Vec::new();
        }
        let _ = sessions.remove(id);
        disconnects.remove(id).unwrap_or_default()
    }
}

/// Attached sessions of one process.
pub struct ConnectionRegistry<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for ConnectionRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> ConnectionRegistry<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create an empty registry. Worker failures go to `reporter`.
    pub fn new(reporter: FaultReporter) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                disconnects: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                reporter,
            }),
        }
    }

    /// Attach `deliver` to session `id`.
    ///
    /// If the session is already attached its delivery function is replaced
    /// and the existing worker keeps running. Returns whether a new worker
    /// was started.
    pub fn listen_event<D: Deliver<P>>(&self, id: &str, deliver: D) -> bool {
        self.attach(id, Arc::new(deliver), None, None)
    }

    /// Attach `deliver` to session `id` with a durable backlog polled every
    /// `poll`.
    pub fn listen_event_with_backlog(
        &self,
        id: &str,
        deliver: Arc<dyn Deliver<P>>,
        backlog: Arc<dyn Backlog<P>>,
        poll: Duration,
    ) -> bool {
        self.attach(id, deliver, Some(backlog), Some(poll))
    }

    fn attach(
        &self,
        id: &str,
        deliver: Arc<dyn Deliver<P>>,
        backlog: Option<Arc<dyn Backlog<P>>>,
        poll: Option<Duration>,
    ) -> bool {
        let (rx, generation, stop) = {
            let mut sessions = self.inner.sessions.lock();
            if let Some(session) = sessions.get_mut(id) {
                debug!(session_id = id, "replacing delivery function");
                session.deliver = deliver;
                return false;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
            let stop = CancellationToken::new();
            let _ = sessions.insert(
                id.to_owned(),
                Session {
                    deliver,
                    tx,
                    generation,
                    stop: stop.clone(),
                },
            );
            (rx, generation, stop)
        };

        info!(session_id = id, "session attached");
        let worker = Worker {
            inner: self.inner.clone(),
            id: id.to_owned(),
            generation,
            backlog,
            poll,
            stop,
        };
        let _ = spawn_reported("fanout.worker", self.inner.reporter.clone(), worker.run(rx));
        true
    }

    /// Run `callback` once, on the next teardown of session `id`.
    ///
    /// Callbacks for ids that are not attached are dropped by [`Self::shutdown`].
    pub fn listen_disconnect(&self, id: &str, callback: impl FnOnce() + Send + 'static) {
        self.inner
            .disconnects
            .lock()
            .entry(id.to_owned())
            .or_default()
            .push(Box::new(callback));
    }

    /// Queue `payload` for every attached session. Returns the number of
    /// sessions it was queued for.
    pub fn emit(&self, payload: &P) -> usize {
        let sessions = self.inner.sessions.lock();
        sessions
            .values()
            .filter(|session| session.tx.send(payload.clone()).is_ok())
            .count()
    }

    /// Queue `payload` for session `id` only.
    pub fn emit_to(&self, id: &str, payload: P) -> bool {
        self.inner
            .sessions
            .lock()
            .get(id)
            .is_some_and(|session| session.tx.send(payload).is_ok())
    }

    /// Whether `id` is attached in this process.
    pub fn is_attached(&self, id: &str) -> bool {
        self.inner.sessions.lock().contains_key(id)
    }

    /// IDs of every attached session.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear session `id` down as if its transport had gone away.
    pub fn detach(&self, id: &str) -> bool {
        self.inner
            .sessions
            .lock()
            .get(id)
            .map(|session| session.stop.cancel())
            .is_some()
    }

    /// Tear every session down.
    pub fn shutdown(&self) {
        let mut disconnects = self.inner.disconnects.lock();
        let sessions = self.inner.sessions.lock();
        for session in sessions.values() {
            session.stop.cancel();
        }
        disconnects.retain(|id, _| sessions.contains_key(id));
    }
}

enum Exit<P> {
    Stopped,
    Refused(P),
}

struct Worker<P> {
    inner: Arc<Inner<P>>,
    id: String,
    generation: u64,
    backlog: Option<Arc<dyn Backlog<P>>>,
    poll: Option<Duration>,
    stop: CancellationToken,
}

impl<P> Worker<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn run(self, mut rx: mpsc::UnboundedReceiver<P>) -> Result<()> {
        let served = self.serve(&mut rx).await;

        let callbacks = self.inner.take_session(&self.id, self.generation);
        rx.close();
        let mut undelivered = Vec::new();
        let outcome = match served {
            Ok(Exit::Refused(payload)) => {
                undelivered.push(payload);
                Ok(())
            }
            Ok(Exit::Stopped) => Ok(()),
            Err(err) => Err(err),
        };
        while let Ok(payload) = rx.try_recv() {
            undelivered.push(payload);
        }

        debug!(session_id = %self.id, callbacks = callbacks.len(), "session disconnected");
        for callback in callbacks {
            callback();
        }

        let stashed = self.stash(undelivered).await;
        outcome
            .and(stashed)
            .map_err(|err| err.for_session(&self.id))
    }

    async fn serve(&self, rx: &mut mpsc::UnboundedReceiver<P>) -> Result<Exit<P>> {
        let mut ticker = self.poll.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut drain_due = true;

        loop {
            if drain_due {
                drain_due = false;
                if let Some(backlog) = &self.backlog {
                    if !self.drain(backlog.as_ref()).await? {
                        return Ok(Exit::Stopped);
                    }
                }
            }

            tokio::select! {
                () = self.stop.cancelled() => return Ok(Exit::Stopped),
                payload = rx.recv() => {
                    let Some(payload) = payload else {
                        return Ok(Exit::Stopped);
                    };
                    if !self.deliver(payload.clone()).await {
                        return Ok(Exit::Refused(payload));
                    }
                }
                () = tick(ticker.as_mut()) => {
                    if let Some(backlog) = &self.backlog {
                        backlog.heartbeat().await?;
                    }
                    drain_due = true;
                }
            }
        }
    }

    /// Deliver buffered entries oldest-first. Returns `false` if delivery was refused.
    async fn drain(&self, backlog: &dyn Backlog<P>) -> Result<bool> {
        while let Some((key, payload)) = backlog.next().await? {
            if self.stop.is_cancelled() {
                break;
            }
            if !self.deliver(payload).await {
                return Ok(false);
            }
            backlog.ack(&key).await?;
        }
        Ok(true)
    }

    async fn deliver(&self, payload: P) -> bool {
        match self.inner.deliver_for(&self.id, self.generation) {
            Some(deliver) => deliver.deliver(payload).await,
            None => false,
        }
    }

    async fn stash(&self, undelivered: Vec<P>) -> Result<()> {
        if undelivered.is_empty() {
            return Ok(());
        }
        match &self.backlog {
            Some(backlog) => {
                debug!(session_id = %self.id, count = undelivered.len(), "stashing undelivered payloads");
                backlog.stash(undelivered).await
            }
            None => {
                warn!(session_id = %self.id, count = undelivered.len(), "dropping undelivered payloads");
                Ok(())
            }
        }
    }
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            let _ = ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
