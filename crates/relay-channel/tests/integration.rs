//! End-to-end channel behavior over the in-process and WebSocket transports.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use proptest::prelude::*;
use relay_channel::{
    Channel, ChannelConfig, ChannelError, ChannelState, Connector, IncomingHandler, MemoryHub,
    MemoryQueue, OutgoingQueue, QueuedMessage, Role, TransportError, WsAcceptor, WsInitiator,
};
use relay_core::{FaultReporter, Message};
use relay_store::{ConnectionQueue, MemoryStore};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

fn fast(role: Role) -> ChannelConfig {
    ChannelConfig {
        reconnect_delay: Duration::from_millis(100),
        ..ChannelConfig::new("MessageService", role)
    }
}

fn collector() -> (Arc<dyn IncomingHandler>, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |message: Message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(message.data);
        }
    };
    (Arc::new(handler), rx)
}

fn open(
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    queue: Arc<dyn OutgoingQueue>,
) -> (Channel, mpsc::UnboundedReceiver<Value>) {
    let (handler, rx) = collector();
    let channel = Channel::open(config, connector, queue, handler, FaultReporter::log_only());
    (channel, rx)
}

fn pair(hub: &MemoryHub) -> (Channel, Channel, mpsc::UnboundedReceiver<Value>) {
    let (server, received) = open(
        fast(Role::Acceptor),
        Arc::new(hub.acceptor()),
        Arc::new(MemoryQueue::new()),
    );
    let (client, _) = open(
        fast(Role::Initiator),
        Arc::new(hub.initiator()),
        Arc::new(MemoryQueue::new()),
    );
    (client, server, received)
}

fn paused<F: Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn queue_order_survives_link_loss(
        values in proptest::collection::vec(any::<u32>(), 1..24),
        kill_at in 0usize..24,
    ) {
        let received = paused(async {
            let hub = MemoryHub::new();
            let (client, _server, mut inbox) = pair(&hub);

            let sends = futures::future::join_all(
                values.iter().map(|v| client.send(Message::new(json!(v)))),
            );
            let receive = async {
                let mut received = Vec::new();
                while received.len() < values.len() {
                    let value = inbox.recv().await.unwrap();
                    received.push(value.as_u64().unwrap() as u32);
                    if received.len() == kill_at {
                        hub.kill_links();
                    }
                }
                received
            };
            let (results, received) = tokio::join!(sends, receive);
            assert!(results.iter().all(Result::is_ok));
            received
        });
        prop_assert_eq!(received, values);
    }
}

#[tokio::test(start_paused = true)]
async fn exhausts_after_fifteen_connects() {
    let hub = MemoryHub::new();
    hub.set_down(true);
    let (client, _) = open(
        ChannelConfig::new("MessageService", Role::Initiator),
        Arc::new(hub.initiator()),
        Arc::new(MemoryQueue::new()),
    );
    let mut states = client.subscribe();
    let started = Instant::now();

    let err = client.send(Message::new(json!("lost"))).await.unwrap_err();
    assert_matches!(
        err,
        ChannelError::RetryExhausted { ref service, role: Role::Initiator, attempt: 15 } if service == "MessageService"
    );
    assert_eq!(hub.connects(), 15);
    assert!(started.elapsed() >= Duration::from_secs(14));

    states.wait_for(|s| *s == ChannelState::Failed).await.unwrap();
    assert_eq!(client.pending().await.unwrap(), 0);

    // No further connects once failed.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(hub.connects(), 15);
    assert_matches!(
        client.send(Message::new(json!("late"))).await,
        Err(ChannelError::RetryExhausted { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn acknowledged_write_resets_the_budget() {
    let hub = MemoryHub::new();
    let (server, mut inbox) = open(
        ChannelConfig::new("MessageService", Role::Acceptor),
        Arc::new(hub.acceptor()),
        Arc::new(MemoryQueue::new()),
    );
    hub.fail_next(14);
    let (client, _) = open(
        ChannelConfig::new("MessageService", Role::Initiator),
        Arc::new(hub.initiator()),
        Arc::new(MemoryQueue::new()),
    );

    client.send(Message::new(json!(1))).await.unwrap();
    assert_eq!(client.attempt(), 0);
    assert_eq!(inbox.recv().await.unwrap(), json!(1));

    hub.fail_next(14);
    hub.kill_links();
    client.send(Message::new(json!(2))).await.unwrap();
    assert_eq!(inbox.recv().await.unwrap(), json!(2));

    assert_eq!(hub.connects(), 30);
    assert!(!client.is_failed());
    assert!(!server.is_failed());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_write_is_resent_once_after_link_loss() {
    let hub = MemoryHub::new();
    let (client, _server, mut inbox) = pair(&hub);
    let mut states = client.subscribe();
    states.wait_for(|s| *s == ChannelState::Ready).await.unwrap();

    hub.stall(true);
    let resend = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.pending().await.unwrap(), 1);
        hub.stall(false);
        hub.kill_links();
    };
    let (sent, ()) = tokio::join!(client.send(Message::new(json!({"n": 1}))), resend);
    sent.unwrap();

    assert_eq!(inbox.recv().await.unwrap(), json!({"n": 1}));
    assert!(timeout(Duration::from_secs(5), inbox.recv()).await.is_err());
    assert_eq!(client.pending().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn persisted_entries_are_sent_on_open() {
    let hub = MemoryHub::new();
    let store = Arc::new(MemoryStore::new());
    let queue: ConnectionQueue<QueuedMessage> =
        ConnectionQueue::for_service(store, "MessageService", "client");
    for n in 0..3 {
        queue.push(&QueuedMessage::new(Message::new(json!(n)))).await.unwrap();
    }

    let (_server, mut inbox) = open(
        fast(Role::Acceptor),
        Arc::new(hub.acceptor()),
        Arc::new(MemoryQueue::new()),
    );
    let (client, _) = open(fast(Role::Initiator), Arc::new(hub.initiator()), Arc::new(queue.clone()));

    for n in 0..3 {
        assert_eq!(inbox.recv().await.unwrap(), json!(n));
    }
    client.send(Message::new(json!(3))).await.unwrap();
    assert_eq!(inbox.recv().await.unwrap(), json!(3));
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn messages_flow_in_both_directions() {
    let hub = MemoryHub::new();
    let (server, mut server_inbox) = open(
        fast(Role::Acceptor),
        Arc::new(hub.acceptor()),
        Arc::new(MemoryQueue::new()),
    );
    let (client, mut client_inbox) = open(
        fast(Role::Initiator),
        Arc::new(hub.initiator()),
        Arc::new(MemoryQueue::new()),
    );

    let (to_server, to_client) = tokio::join!(
        client.send(Message::new(json!({"side": "client", "value": 1}))),
        server.send(Message::new(json!({"side": "server", "value": 2}))),
    );
    to_server.unwrap();
    to_client.unwrap();
    assert_eq!(server_inbox.recv().await.unwrap()["side"], "client");
    assert_eq!(client_inbox.recv().await.unwrap()["side"], "server");
}

mod websocket {
    use super::*;

    async fn wait_ready(channel: &Channel) {
        let mut states = channel.subscribe();
        timeout(
            Duration::from_secs(10),
            states.wait_for(|s| *s == ChannelState::Ready),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_peer_is_dropped() {
        let acceptor = Arc::new(WsAcceptor::new("MessageService", "127.0.0.1:0"));
        let addr = acceptor.bind().await.unwrap();

        let (server, mut server_inbox) = open(
            fast(Role::Acceptor),
            acceptor.clone(),
            Arc::new(MemoryQueue::new()),
        );
        let (client, mut client_inbox) = open(
            fast(Role::Initiator),
            Arc::new(WsInitiator::new("MessageService", addr.to_string())),
            Arc::new(MemoryQueue::new()),
        );

        client.send(Message::new(json!(1))).await.unwrap();
        assert_eq!(server_inbox.recv().await.unwrap(), json!(1));

        let mut states = client.subscribe();
        let _ = states.borrow_and_update();
        acceptor.disconnect_peer();
        timeout(Duration::from_secs(10), states.changed())
            .await
            .unwrap()
            .unwrap();
        wait_ready(&client).await;

        client.send(Message::new(json!(2))).await.unwrap();
        assert_eq!(server_inbox.recv().await.unwrap(), json!(2));

        wait_ready(&server).await;
        server.send(Message::new(json!("pong"))).await.unwrap();
        assert_eq!(client_inbox.recv().await.unwrap(), json!("pong"));

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn second_initiator_is_refused() {
        let acceptor = Arc::new(WsAcceptor::new("MessageService", "127.0.0.1:0"));
        let addr = acceptor.bind().await.unwrap();
        let (server, _) = open(fast(Role::Acceptor), acceptor, Arc::new(MemoryQueue::new()));
        let (client, _) = open(
            fast(Role::Initiator),
            Arc::new(WsInitiator::new("MessageService", addr.to_string())),
            Arc::new(MemoryQueue::new()),
        );
        wait_ready(&client).await;
        wait_ready(&server).await;

        let intruder = WsInitiator::new("MessageService", addr.to_string());
        let err = intruder.establish(1).await.err().unwrap();
        assert_matches!(err, TransportError::Rejected(msg) if msg.contains("409"));
        assert_eq!(client.state(), ChannelState::Ready);
    }
}
