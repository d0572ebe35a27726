//! WebSocket transport.
//!
//! Records travel as JSON text frames. The acceptor serves
//! `ws://<endpoint>/<service>` with axum and admits one peer at a time; a
//! second upgrade while a peer is attached is answered with `409 Conflict`.
//! The initiator dials the same URL with tokio-tungstenite.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::future::ready;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relay_core::WireRecord;
use tokio::net::TcpListener;
use tokio::sync::{OnceCell, mpsc};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::TransportError;
use crate::transport::{Connector, Duplex};

const DUPLICATE_LINK: &str = "Only one bidirectional connection allowed";

/// Replace the current link token, cancelling the previous one.
fn rotate(current: &Mutex<Option<CancellationToken>>) -> CancellationToken {
    let token = CancellationToken::new();
    if let Some(previous) = current.lock().replace(token.clone()) {
        previous.cancel();
    }
    token
}

fn cancel(current: &Mutex<Option<CancellationToken>>) {
    if let Some(token) = current.lock().take() {
        token.cancel();
    }
}

fn decode(text: &str) -> Option<Result<WireRecord, TransportError>> {
    match WireRecord::from_frame(text) {
        Ok(record) => Some(Ok(record)),
        Err(err) => {
            warn!(error = %err, "dropping undecodable frame");
            None
        }
    }
}

/// Dials `ws://<endpoint>/<service>`.
pub struct WsInitiator {
    service: String,
    endpoint: String,
    current: Mutex<Option<CancellationToken>>,
}

impl WsInitiator {
    /// Connector for `service` at `endpoint` (`host:port`).
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            current: Mutex::new(None),
        }
    }

    /// URL dialed on every connect.
    pub fn url(&self) -> String {
        format!("ws://{}/{}", self.endpoint, self.service)
    }
}

#[async_trait]
impl Connector for WsInitiator {
    async fn establish(&self, attempt: u32) -> Result<Duplex, TransportError> {
        let url = self.url();
        debug!(%url, attempt, "dialing");
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let token = rotate(&self.current);
        let (sink, stream) = socket.split();

        let sink = sink.with(|record: WireRecord| {
            ready(
                record
                    .to_frame()
                    .map(|frame| TungsteniteMessage::Text(frame.into()))
                    .map_err(TransportError::from),
            )
        });
        let stream = stream
            .take_until(token.cancelled_owned())
            .filter_map(|frame| {
                ready(match frame {
                    Ok(TungsteniteMessage::Text(text)) => decode(text.as_str()),
                    Ok(TungsteniteMessage::Close(_)) => Some(Err(TransportError::Closed)),
                    Ok(_) => None,
                    Err(err) => Some(Err(err.into())),
                })
            });
        Ok(Duplex::new(sink, stream))
    }

    async fn shutdown(&self) {
        cancel(&self.current);
    }
}

type Upgraded = (WebSocket, ActiveGuard);

/// Clears the acceptor's active flag when the attached peer goes away.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct AcceptState {
    active: Arc<AtomicBool>,
    sockets: mpsc::Sender<Upgraded>,
}

async fn upgrade(State(state): State<AcceptState>, ws: WebSocketUpgrade) -> Response {
    if state.active.swap(true, Ordering::SeqCst) {
        warn!("rejecting second peer");
        return (StatusCode::CONFLICT, DUPLICATE_LINK).into_response();
    }
    let guard = ActiveGuard(state.active.clone());
    ws.on_upgrade(move |socket| async move {
        if state.sockets.send((socket, guard)).await.is_err() {
            debug!("acceptor gone, dropping upgraded socket");
        }
    })
}

/// Serves `ws://<endpoint>/<service>` and hands each admitted peer to the channel.
pub struct WsAcceptor {
    service: String,
    addr: String,
    state: AcceptState,
    sockets: tokio::sync::Mutex<mpsc::Receiver<Upgraded>>,
    bound: OnceCell<SocketAddr>,
    current: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl WsAcceptor {
    /// Acceptor for `service`, listening on `addr` once first used.
    pub fn new(service: impl Into<String>, addr: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            service: service.into(),
            addr: addr.into(),
            state: AcceptState {
                active: Arc::new(AtomicBool::new(false)),
                sockets: tx,
            },
            sockets: tokio::sync::Mutex::new(rx),
            bound: OnceCell::new(),
            current: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind the listener if not yet bound and return its address.
    pub async fn bind(&self) -> Result<SocketAddr, TransportError> {
        self.bound
            .get_or_try_init(|| async {
                let listener = TcpListener::bind(&self.addr).await.map_err(|source| {
                    TransportError::Bind {
                        addr: self.addr.clone(),
                        source,
                    }
                })?;
                let local = listener.local_addr().map_err(|source| TransportError::Bind {
                    addr: self.addr.clone(),
                    source,
                })?;

                let router = Router::new()
                    .route(&format!("/{}", self.service), get(upgrade))
                    .with_state(self.state.clone());
                let shutdown = self.shutdown.clone();
                let service = self.service.clone();
                info!(service = %service, addr = %local, "acceptor listening");
                let _server = tokio::spawn(async move {
                    let served = axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown.cancelled_owned())
                        .await;
                    if let Err(err) = served {
                        warn!(service = %service, error = %err, "acceptor server stopped");
                    }
                });
                Ok(local)
            })
            .await
            .copied()
    }

    /// Drop the attached peer, if any.
    pub fn disconnect_peer(&self) {
        cancel(&self.current);
    }

    async fn next_socket(&self) -> Result<Upgraded, TransportError> {
        let mut sockets = self.sockets.lock().await;
        tokio::select! {
            () = self.shutdown.cancelled() => Err(TransportError::Closed),
            upgraded = sockets.recv() => upgraded.ok_or(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Connector for WsAcceptor {
    async fn establish(&self, attempt: u32) -> Result<Duplex, TransportError> {
        let local = self.bind().await?;
        debug!(service = %self.service, addr = %local, attempt, "waiting for peer");
        let (socket, guard) = self.next_socket().await?;
        let token = rotate(&self.current);
        let (sink, stream) = socket.split();

        let sink = sink.with(|record: WireRecord| {
            ready(
                record
                    .to_frame()
                    .map(|frame| AxumMessage::Text(frame.into()))
                    .map_err(TransportError::from),
            )
        });
        let stream = stream
            .take_until(token.cancelled_owned())
            .filter_map(|frame| {
                ready(match frame {
                    Ok(AxumMessage::Text(text)) => decode(text.as_str()),
                    Ok(AxumMessage::Close(_)) => Some(Err(TransportError::Closed)),
                    Ok(_) => None,
                    Err(err) => Some(Err(err.into())),
                })
            })
            .map(move |item| {
                let _ = &guard;
                item
            });
        Ok(Duplex::new(sink, stream))
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        self.disconnect_peer();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn record(data: &str) -> WireRecord {
        WireRecord {
            client_id: "c1".into(),
            request_id: String::new(),
            service_name: "MessageService".into(),
            user_id: String::new(),
            stamp: String::new(),
            data: data.into(),
        }
    }

    async fn listening() -> (WsAcceptor, WsInitiator) {
        let acceptor = WsAcceptor::new("MessageService", "127.0.0.1:0");
        let addr = acceptor.bind().await.unwrap();
        let initiator = WsInitiator::new("MessageService", addr.to_string());
        (acceptor, initiator)
    }

    #[tokio::test]
    async fn records_flow_both_ways() {
        let (acceptor, initiator) = listening().await;
        let mut client = initiator.establish(1).await.unwrap();
        let mut server = acceptor.establish(1).await.unwrap();

        client.sink.send(record("1")).await.unwrap();
        server.sink.send(record("2")).await.unwrap();

        assert_eq!(server.stream.next().await.unwrap().unwrap(), record("1"));
        assert_eq!(client.stream.next().await.unwrap().unwrap(), record("2"));
    }

    #[tokio::test]
    async fn second_peer_gets_conflict() {
        let (acceptor, initiator) = listening().await;
        let _client = initiator.establish(1).await.unwrap();
        let _server = acceptor.establish(1).await.unwrap();

        let second = WsInitiator::new("MessageService", acceptor.bind().await.unwrap().to_string());
        let err = second.establish(1).await.err().unwrap();
        assert_matches!(err, TransportError::Rejected(msg) if msg.contains("409"));
    }

    #[tokio::test]
    async fn disconnect_ends_both_sides() {
        let (acceptor, initiator) = listening().await;
        let mut client = initiator.establish(1).await.unwrap();
        let mut server = acceptor.establish(1).await.unwrap();

        acceptor.disconnect_peer();
        assert!(server.stream.next().await.is_none());
        drop(server);

        let next = client.stream.next().await;
        assert!(!matches!(next, Some(Ok(_))));
    }

    #[tokio::test]
    async fn refused_when_nothing_listens() {
        let (acceptor, initiator) = listening().await;
        acceptor.shutdown().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(initiator.establish(1).await.is_err());
    }

    #[test]
    fn url_includes_service_path() {
        let initiator = WsInitiator::new("FooService", "localhost:50051");
        assert_eq!(initiator.url(), "ws://localhost:50051/FooService");
    }
}
