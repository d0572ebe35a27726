//! In-process transport for tests and single-process setups.
//!
//! A [`MemoryHub`] pairs one initiator with one acceptor, the same way a
//! service endpoint does. The hub also exposes fault injection: dropping
//! every live link, refusing connects, and stalling writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, sink, stream};
use parking_lot::Mutex;
use relay_core::WireRecord;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::TransportError;
use crate::role::Role;
use crate::transport::{Connector, Duplex};

const DUPLICATE_LINK: &str = "Only one bidirectional connection allowed";

struct PeerEnd {
    tx: mpsc::UnboundedSender<WireRecord>,
    rx: mpsc::UnboundedReceiver<WireRecord>,
    token: CancellationToken,
}

struct HubInner {
    pending: mpsc::UnboundedSender<PeerEnd>,
    peers: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerEnd>>,
    links: Mutex<Vec<CancellationToken>>,
    active: AtomicBool,
    down: AtomicBool,
    stall: AtomicBool,
    fail_next: AtomicU32,
    connects: AtomicU32,
}

/// Rendezvous point for one in-process service link.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Create a hub with no live link.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = HubInner {
            pending: tx,
            peers: tokio::sync::Mutex::new(rx),
            links: Mutex::new(Vec::new()),
            active: AtomicBool::new(false),
            down: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Connector for the dialing side.
    pub fn initiator(&self) -> MemoryConnector {
        MemoryConnector {
            hub: self.clone(),
            role: Role::Initiator,
        }
    }

    /// Connector for the listening side.
    pub fn acceptor(&self) -> MemoryConnector {
        MemoryConnector {
            hub: self.clone(),
            role: Role::Acceptor,
        }
    }

    /// Terminate every live link. Both ends see their stream end.
    pub fn kill_links(&self) {
        let links = std::mem::take(&mut *self.inner.links.lock());
        debug!(count = links.len(), "killing memory links");
        for token in links {
            token.cancel();
        }
    }

    /// While down, initiator connects fail immediately.
    pub fn set_down(&self, down: bool) {
        self.inner.down.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` initiator connects.
    pub fn fail_next(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// While stalled, writes never complete; they fail when their link dies.
    pub fn stall(&self, stall: bool) {
        self.inner.stall.store(stall, Ordering::SeqCst);
    }

    /// Initiator connects seen so far.
    pub fn connects(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    fn dial(&self) -> Result<Duplex, TransportError> {
        let inner = &self.inner;
        let _ = inner.connects.fetch_add(1, Ordering::SeqCst);
        if inner.down.load(Ordering::SeqCst) {
            return Err(TransportError::Refused("memory hub is down".into()));
        }
        let skipped = inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if skipped.is_ok() {
            return Err(TransportError::Refused("injected connect failure".into()));
        }
        if inner.active.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Rejected(DUPLICATE_LINK.into()));
        }

        let (to_acceptor, from_initiator) = mpsc::unbounded_channel();
        let (to_initiator, from_acceptor) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        inner.links.lock().push(token.clone());

        let remote = PeerEnd {
            tx: to_initiator,
            rx: from_initiator,
            token: token.clone(),
        };
        if inner.pending.send(remote).is_err() {
            inner.active.store(false, Ordering::SeqCst);
            return Err(TransportError::Refused("memory hub closed".into()));
        }

        let local = PeerEnd {
            tx: to_acceptor,
            rx: from_acceptor,
            token,
        };
        Ok(self.duplex(local, None))
    }

    async fn accept(&self) -> Result<Duplex, TransportError> {
        let end = self
            .inner
            .peers
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;
        let guard = ActiveGuard(self.inner.clone());
        Ok(self.duplex(end, Some(guard)))
    }

    fn duplex(&self, end: PeerEnd, guard: Option<ActiveGuard>) -> Duplex {
        let PeerEnd { tx, rx, token } = end;
        let inner = self.inner.clone();

        let write_token = token.clone();
        let writer = sink::unfold(tx, move |tx, record: WireRecord| {
            let token = write_token.clone();
            let stalled = inner.stall.load(Ordering::SeqCst);
            async move {
                if stalled {
                    token.cancelled().await;
                }
                if token.is_cancelled() {
                    return Err(TransportError::Closed);
                }
                tx.send(record).map_err(|_| TransportError::Closed)?;
                Ok(tx)
            }
        });

        // Records already written are delivered before the link reports its end.
        let reader = stream::unfold((rx, token), |(mut rx, token)| async move {
            let record = tokio::select! {
                biased;
                record = rx.recv() => record,
                () = token.cancelled() => None,
            };
            record.map(|record| (Ok(record), (rx, token)))
        })
        .map(move |item| {
            let _ = &guard;
            item
        });

        Duplex::new(writer, reader)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the hub's active flag when the acceptor end is dropped.
struct ActiveGuard(Arc<HubInner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::SeqCst);
    }
}

/// One side of a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryConnector {
    hub: MemoryHub,
    role: Role,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn establish(&self, attempt: u32) -> Result<Duplex, TransportError> {
        debug!(role = %self.role, attempt, "memory establish");
        match self.role {
            Role::Initiator => self.hub.dial(),
            Role::Acceptor => self.hub.accept().await,
        }
    }

    async fn shutdown(&self) {
        self.hub.kill_links();
    }
}
