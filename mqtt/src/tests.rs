//! Client tests.
//!
//! Most tests drive the client through `StubBroker`, an in-memory transport
//! that records what was sent and scripts what comes back. The tests at the
//! bottom run against a real rumqttd broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::{EventSource, Requester, Transport, TransportEvent};
use crate::{
    BatchMode, BrokerConfig, Client, ConnectReturnCode, ConnectionState, DisconnectReason, Error,
    Message, MessageId, PublishRequest, QoS, Result, RoomDeviceTable, SubscribeReturnCode,
    Subscription, Termination, build_topics,
};

// ============================================================================
// Stub transport
// ============================================================================

#[derive(Default)]
struct StubState {
    refuse_with: Option<ConnectReturnCode>,
    unreachable: bool,
    manual_ack: bool,
    reject: Vec<String>,
    fail_publish_at: Option<usize>,
    published: Vec<PublishRequest>,
    bytes_written: usize,
    sessions: usize,
    active: Vec<String>,
    inflight: Vec<(u16, QoS)>,
    link: Option<mpsc::UnboundedSender<Result<TransportEvent>>>,
    next_pkid: u16,
}

impl StubState {
    fn emit(&self, event: TransportEvent) {
        if let Some(link) = &self.link {
            let _ = link.send(Ok(event));
        }
    }

    fn pkid(&mut self) -> u16 {
        self.next_pkid += 1;
        self.next_pkid
    }
}

fn ack_for(qos: QoS, pkid: u16) -> TransportEvent {
    match qos {
        QoS::ExactlyOnce => TransportEvent::PubComp { pkid },
        _ => TransportEvent::PubAck { pkid },
    }
}

/// Single-level `+` and trailing `#` matching, enough for the stub.
fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        match (level, topic_levels.next()) {
            ("#", _) => return true,
            ("+", Some(_)) => {}
            (l, Some(t)) if l == t => {}
            _ => return false,
        }
    }
    topic_levels.next().is_none()
}

#[derive(Clone, Default)]
struct StubBroker {
    state: Arc<Mutex<StubState>>,
}

impl StubBroker {
    fn new() -> Self {
        Self::default()
    }

    fn configure(&self, f: impl FnOnce(&mut StubState)) -> &Self {
        f(&mut self.state.lock());
        self
    }

    fn client(&self) -> Client {
        let config = BrokerConfig::new("localhost", 1883)
            .with_keep_alive(60)
            .with_client_id("stub-client");
        Client::with_transport(config, Arc::new(self.clone()))
    }

    fn published_topics(&self) -> Vec<String> {
        self.state
            .lock()
            .published
            .iter()
            .map(|p| p.topic.clone())
            .collect()
    }

    fn bytes_written(&self) -> usize {
        self.state.lock().bytes_written
    }

    fn sessions(&self) -> usize {
        self.state.lock().sessions
    }

    /// Acknowledge every publish still waiting for one.
    fn ack_all(&self) {
        let mut state = self.state.lock();
        for (pkid, qos) in std::mem::take(&mut state.inflight) {
            state.emit(ack_for(qos, pkid));
        }
    }

    /// Deliver one copy per matching subscription.
    fn deliver(&self, topic: &str, payload: &str) {
        let state = self.state.lock();
        for filter in &state.active {
            if filter_matches(filter, topic) {
                state.emit(TransportEvent::Message(Message::new(
                    topic.to_string(),
                    payload.to_string(),
                )));
            }
        }
    }

    fn close_from_broker(&self) {
        self.state.lock().emit(TransportEvent::BrokerDisconnect);
    }

    fn reset_connection(&self) {
        if let Some(link) = &self.state.lock().link {
            let _ = link.send(Err(Error::Network("connection reset by peer".to_string())));
        }
    }
}

impl Transport for StubBroker {
    fn open(&self, _config: &BrokerConfig) -> Result<(Box<dyn Requester>, Box<dyn EventSource>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.sessions += 1;
        state.active.clear();
        state.inflight.clear();

        if state.unreachable {
            let _ = tx.send(Err(Error::Network("connection refused by host".to_string())));
        } else {
            let code = state.refuse_with.unwrap_or(ConnectReturnCode::Accepted);
            let _ = tx.send(Ok(TransportEvent::ConnAck {
                code,
                session_present: false,
            }));
        }
        state.link = Some(tx);

        Ok((
            Box::new(StubRequester {
                broker: self.clone(),
            }),
            Box::new(StubEvents { rx }),
        ))
    }
}

struct StubRequester {
    broker: StubBroker,
}

#[async_trait]
impl Requester for StubRequester {
    async fn publish(&self, request: &PublishRequest) -> Result<()> {
        let mut state = self.broker.state.lock();
        if state.fail_publish_at == Some(state.published.len()) {
            return Err(Error::Network("request queue closed".to_string()));
        }

        state.bytes_written += request.topic.len() + request.payload.len();
        state.published.push(request.clone());

        if request.qos != QoS::AtMostOnce {
            let pkid = state.pkid();
            state.emit(TransportEvent::PublishSent { pkid });
            if state.manual_ack {
                state.inflight.push((pkid, request.qos));
            } else {
                state.emit(ack_for(request.qos, pkid));
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()> {
        let mut state = self.broker.state.lock();
        let pkid = state.pkid();
        state.emit(TransportEvent::SubscribeSent { pkid });

        let mut codes = Vec::with_capacity(subscriptions.len());
        for sub in subscriptions {
            if state.reject.contains(&sub.filter) {
                codes.push(SubscribeReturnCode::Failure);
            } else {
                state.active.push(sub.filter.clone());
                codes.push(SubscribeReturnCode::Granted(sub.qos));
            }
        }
        state.emit(TransportEvent::SubAck { pkid, codes });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.broker.state.lock().emit(TransportEvent::DisconnectSent);
        Ok(())
    }
}

struct StubEvents {
    rx: mpsc::UnboundedReceiver<Result<TransportEvent>>,
}

#[async_trait]
impl EventSource for StubEvents {
    async fn poll(&mut self) -> Result<TransportEvent> {
        match self.rx.recv().await {
            Some(event) => event,
            None => Err(Error::Network("stub link closed".to_string())),
        }
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(v)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected event: {v:?}");
    }
}

fn completions(client: &Client) -> mpsc::UnboundedReceiver<MessageId> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on_publish_complete(move |id| {
        let _ = tx.send(id);
    });
    rx
}

fn messages(client: &Client) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on_message(move |msg: &Message| {
        let _ = tx.send(format!(
            "Topic: {} Message: {}",
            msg.topic,
            msg.payload_str().unwrap_or_default()
        ));
    });
    rx
}

// ============================================================================
// Connection lifecycle
// ============================================================================

mod connection_tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let broker = StubBroker::new();
        let client = broker.client();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let (code_tx, mut codes) = mpsc::unbounded_channel();
        client.on_connect_result(move |code| {
            let _ = code_tx.send(code);
        });
        let (reason_tx, mut reasons) = mpsc::unbounded_channel();
        client.on_disconnect(move |reason| {
            let _ = reason_tx.send(reason.clone());
        });

        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(recv(&mut codes).await, ConnectReturnCode::Accepted);

        // Already connected: no second session.
        client.connect().await.unwrap();
        assert_eq!(broker.sessions(), 1);

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(recv(&mut reasons).await, DisconnectReason::ClientRequested);
        assert_eq!(
            client.last_disconnect_reason(),
            Some(DisconnectReason::ClientRequested)
        );

        // Second disconnect is a no-op and fires nothing.
        client.disconnect().await.unwrap();
        assert_silent(&mut reasons).await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let broker = StubBroker::new();
        broker.configure(|s| s.refuse_with = Some(ConnectReturnCode::NotAuthorized));
        let client = broker.client();

        let (tx, mut codes) = mpsc::unbounded_channel();
        client.on_connect_result(move |code| {
            let _ = tx.send(code);
        });

        let err = client.connect().await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectionRefused(ConnectReturnCode::NotAuthorized)
        ));
        assert_eq!(recv(&mut codes).await.code(), 5);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let broker = StubBroker::new();
        broker.configure(|s| s.unreachable = true);
        let client = broker.client();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_invalid_config() {
        let client = Client::with_transport(
            BrokerConfig::new("localhost", 1883).with_keep_alive(0),
            Arc::new(StubBroker::new()),
        );
        assert!(matches!(
            client.connect().await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_lost() {
        let broker = StubBroker::new();
        let client = broker.client();
        let (tx, mut reasons) = mpsc::unbounded_channel();
        client.on_disconnect(move |reason| {
            let _ = tx.send(reason.clone());
        });
        client.connect().await.unwrap();

        broker.reset_connection();
        match recv(&mut reasons).await {
            DisconnectReason::ConnectionLost(detail) => assert!(detail.contains("reset")),
            other => panic!("unexpected reason: {other:?}"),
        }
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // Disconnect after loss does not report a second time.
        client.disconnect().await.unwrap();
        assert_silent(&mut reasons).await;
    }

    #[tokio::test]
    async fn test_reconnect_opens_fresh_session() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();
        client
            .subscribe([Subscription::new("room1/+", QoS::AtMostOnce)])
            .await
            .unwrap();
        assert_eq!(client.subscriptions().len(), 1);

        broker.close_from_broker();
        client.wait_disconnected().await;
        assert_eq!(
            client.last_disconnect_reason(),
            Some(DisconnectReason::BrokerClosed)
        );

        client.connect().await.unwrap();
        assert_eq!(broker.sessions(), 2);
        assert!(client.subscriptions().is_empty());
    }
}

// ============================================================================
// Publishing
// ============================================================================

mod publish_tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_before_connect() {
        let broker = StubBroker::new();
        let client = broker.client();

        let err = client
            .publish(PublishRequest::new("westside/led1", "DOWN"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(broker.bytes_written(), 0);
    }

    #[tokio::test]
    async fn test_publish_led_then_disconnect() {
        let broker = StubBroker::new();
        let client = broker.client();
        assert_eq!(client.config().addr(), "localhost:1883");
        assert_eq!(client.config().keep_alive, 60);
        let mut done = completions(&client);

        client.connect().await.unwrap();
        let id = client
            .publish(PublishRequest::new("westside/led1", "DOWN"))
            .await
            .unwrap();
        assert_eq!(recv(&mut done).await, id);
        assert!(id.get() > 0);

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(broker.bytes_written(), "westside/led1".len() + "DOWN".len());
    }

    #[tokio::test]
    async fn test_qos0_completes_without_ack() {
        let broker = StubBroker::new();
        broker.configure(|s| s.manual_ack = true);
        let client = broker.client();
        let mut done = completions(&client);
        client.connect().await.unwrap();

        let handle = client
            .publish_tracked(PublishRequest::new("westside/led1", "DOWN"))
            .await
            .unwrap();
        let id = handle.id();
        assert_eq!(handle.wait().await.unwrap(), id);
        assert_eq!(recv(&mut done).await, id);
    }

    #[tokio::test]
    async fn test_publish_order() {
        let broker = StubBroker::new();
        let client = broker.client();
        let mut done = completions(&client);
        client.connect().await.unwrap();

        let mut ids = Vec::new();
        for topic in ["westside/A", "westside/B", "westside/C"] {
            let request = PublishRequest::new(topic, "x").with_qos(QoS::AtLeastOnce);
            ids.push(client.publish(request).await.unwrap());
        }

        assert_eq!(
            broker.published_topics(),
            vec!["westside/A", "westside/B", "westside/C"]
        );
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for id in &ids {
            assert_eq!(recv(&mut done).await, *id);
        }
    }

    #[tokio::test]
    async fn test_qos1_completes_on_ack() {
        let broker = StubBroker::new();
        broker.configure(|s| s.manual_ack = true);
        let client = broker.client();
        let mut done = completions(&client);
        client.connect().await.unwrap();

        let first = client
            .publish(PublishRequest::new("westside/led1", "DOWN").with_qos(QoS::AtLeastOnce))
            .await
            .unwrap();
        let second = client
            .publish(PublishRequest::new("westside/led2", "UP").with_qos(QoS::ExactlyOnce))
            .await
            .unwrap();
        assert_silent(&mut done).await;

        broker.ack_all();
        let mut got = vec![recv(&mut done).await, recv(&mut done).await];
        got.sort();
        assert_eq!(got, vec![first, second]);
    }

    #[tokio::test]
    async fn test_qos0_completes_before_unacked_qos2() {
        let broker = StubBroker::new();
        broker.configure(|s| s.manual_ack = true);
        let client = broker.client();
        let mut done = completions(&client);
        client.connect().await.unwrap();

        let exactly_once = client
            .publish(PublishRequest::new("westside/led1", "DOWN").with_qos(QoS::ExactlyOnce))
            .await
            .unwrap();
        let at_most_once = client
            .publish(PublishRequest::new("westside/led2", "UP"))
            .await
            .unwrap();
        assert!(exactly_once < at_most_once);

        // Issued later, completed first.
        assert_eq!(recv(&mut done).await, at_most_once);
        assert_silent(&mut done).await;

        broker.ack_all();
        assert_eq!(recv(&mut done).await, exactly_once);
        assert_eq!(broker.published_topics(), vec!["westside/led1", "westside/led2"]);
    }

    #[tokio::test]
    async fn test_pending_publish_fails_on_connection_loss() {
        let broker = StubBroker::new();
        broker.configure(|s| s.manual_ack = true);
        let client = broker.client();
        client.connect().await.unwrap();

        let handle = client
            .publish_tracked(PublishRequest::new("westside/led1", "DOWN").with_qos(QoS::AtLeastOnce))
            .await
            .unwrap();
        broker.reset_connection();

        assert!(matches!(handle.wait().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let broker = StubBroker::new();
        broker.configure(|s| s.manual_ack = true);
        let client = broker.client();
        client.connect().await.unwrap();

        let handle = client
            .publish_tracked(PublishRequest::new("westside/led3", "DOWN").with_qos(QoS::AtLeastOnce))
            .await
            .unwrap();
        assert!(matches!(
            handle.wait_timeout(Duration::from_millis(20)).await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_invalid_topic() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        assert!(matches!(
            client.publish(PublishRequest::new("westside/+", "x")).await,
            Err(Error::InvalidTopic(_))
        ));
        assert_eq!(broker.bytes_written(), 0);
    }

    #[tokio::test]
    async fn test_batch_partial_failure() {
        let broker = StubBroker::new();
        broker.configure(|s| s.fail_publish_at = Some(2));
        let client = broker.client();
        client.connect().await.unwrap();

        let batch = ["led1", "led2", "led3", "led4"]
            .map(|led| PublishRequest::new(format!("westside/{led}"), "UP"));
        let err = client
            .publish_batch(batch, BatchMode::Pipelined)
            .await
            .unwrap_err();

        assert_eq!(err.batch_progress(), Some((2, 2)));
        assert!(matches!(
            err,
            Error::PublishBatchPartialFailure { ref source, .. } if matches!(**source, Error::Network(_))
        ));
        assert_eq!(broker.published_topics(), vec!["westside/led1", "westside/led2"]);
    }

    #[tokio::test]
    async fn test_batch_await_each() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let batch = vec![
            PublishRequest::new("westside/led1", "DOWN").with_qos(QoS::AtLeastOnce),
            PublishRequest::new("westside/led2", "UP").with_qos(QoS::AtLeastOnce),
            PublishRequest::new("westside/led3", "DOWN"),
        ];
        let ids = client
            .publish_batch(batch, BatchMode::AwaitEach)
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
    }
}

// ============================================================================
// Subscribing
// ============================================================================

mod subscribe_tests {
    use super::*;

    fn room_subscriptions() -> Vec<Subscription> {
        let table = RoomDeviceTable::new()
            .with_room("room1", ["device1", "device2", "device3", "device4", "device5"])
            .with_room("room2", ["device1", "device2", "device3", "device4"]);
        build_topics(&table)
            .unwrap()
            .into_iter()
            .map(|topic| Subscription::new(topic, QoS::AtMostOnce))
            .collect()
    }

    #[tokio::test]
    async fn test_room_subscription_receives_message() {
        let broker = StubBroker::new();
        let client = broker.client();
        let mut inbox = messages(&client);
        client.connect().await.unwrap();

        client.subscribe(room_subscriptions()).await.unwrap();
        assert_eq!(client.subscriptions().len(), 9);

        broker.deliver("room1/device3", "on");
        assert_eq!(recv(&mut inbox).await, "Topic: room1/device3 Message: on");

        // Not subscribed.
        broker.deliver("room3/device1", "on");
        assert_silent(&mut inbox).await;
    }

    #[tokio::test]
    async fn test_subscribe_returns_unit() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let () = client
            .subscribe([Subscription::new("room1/device2", QoS::AtLeastOnce)])
            .await
            .unwrap();
        assert_eq!(
            client.subscriptions(),
            vec![Subscription::new("room1/device2", QoS::AtLeastOnce)]
        );

        // No filters: nothing is sent, still succeeds.
        let () = client.subscribe(Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_disconnect() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();
        client
            .subscribe([Subscription::new("westside/#", QoS::AtLeastOnce)])
            .await
            .unwrap();

        broker.close_from_broker();
        client.wait_disconnected().await;

        let err = client
            .subscribe([Subscription::new("westside/#", QoS::AtLeastOnce)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_filters_deliver_each_copy() {
        let broker = StubBroker::new();
        let client = broker.client();
        let mut inbox = messages(&client);
        client.connect().await.unwrap();

        client
            .subscribe([
                Subscription::new("room1/+", QoS::AtMostOnce),
                Subscription::new("room1/device1", QoS::AtMostOnce),
            ])
            .await
            .unwrap();

        broker.deliver("room1/device1", "off");
        assert_eq!(recv(&mut inbox).await, "Topic: room1/device1 Message: off");
        assert_eq!(recv(&mut inbox).await, "Topic: room1/device1 Message: off");
        assert_silent(&mut inbox).await;
    }

    #[tokio::test]
    async fn test_duplicate_filter_sent_once() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let codes = client
            .subscribe_and_wait(
                [
                    Subscription::new("westside/#", QoS::AtMostOnce),
                    Subscription::new("westside/#", QoS::AtLeastOnce),
                ],
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(codes, vec![SubscribeReturnCode::Granted(QoS::AtLeastOnce)]);
        assert_eq!(
            client.subscriptions(),
            vec![Subscription::new("westside/#", QoS::AtLeastOnce)]
        );
    }

    #[tokio::test]
    async fn test_subscribe_rejected() {
        let broker = StubBroker::new();
        broker.configure(|s| s.reject = vec!["forbidden/#".to_string()]);
        let client = broker.client();
        client.connect().await.unwrap();

        let err = client
            .subscribe_and_wait(
                [
                    Subscription::new("room1/+", QoS::AtMostOnce),
                    Subscription::new("forbidden/#", QoS::AtMostOnce),
                ],
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SubscribeRejected(ref f) if f == "forbidden/#"));
        assert_eq!(
            client.subscriptions(),
            vec![Subscription::new("room1/+", QoS::AtMostOnce)]
        );
    }

    #[tokio::test]
    async fn test_subscribe_invalid_filter() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let err = client
            .subscribe([Subscription::new("westside/#/led", QoS::AtMostOnce)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTopicFilter(_)));
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_handler_replaced() {
        let broker = StubBroker::new();
        let client = broker.client();
        let first = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        client.on_message(move |_: &Message| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let mut inbox = messages(&client);

        client.connect().await.unwrap();
        client
            .subscribe([Subscription::new("room2/+", QoS::AtMostOnce)])
            .await
            .unwrap();
        broker.deliver("room2/device4", "on");

        assert_eq!(recv(&mut inbox).await, "Topic: room2/device4 Message: on");
        assert_eq!(first.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let termination = client
            .run_until_cancelled(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(termination, Termination::Cancelled);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            client.last_disconnect_reason(),
            Some(DisconnectReason::ClientRequested)
        );
    }

    #[tokio::test]
    async fn test_run_until_connection_ends() {
        let broker = StubBroker::new();
        let client = broker.client();
        client.connect().await.unwrap();

        let closer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close_from_broker();
        });

        let termination = client
            .run_until_cancelled(std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(
            termination,
            Termination::Disconnected(DisconnectReason::BrokerClosed)
        );
    }

    #[tokio::test]
    async fn test_run_requires_connection() {
        let client = StubBroker::new().client();
        assert!(matches!(
            client.run_until_cancelled(std::future::ready(())).await,
            Err(Error::NotConnected)
        ));
    }
}

// ============================================================================
// Tests: client with standard rumqttd broker
// ============================================================================

mod rumqttd_tests {
    use super::*;

    /// Find an available port for testing.
    fn find_available_port() -> u16 {
        static PORT: AtomicUsize = AtomicUsize::new(18300);
        PORT.fetch_add(1, Ordering::SeqCst) as u16
    }

    fn start_broker(port: u16) {
        let config = create_rumqttd_config(&format!("127.0.0.1:{}", port));
        let mut broker = rumqttd::Broker::new(config);
        std::thread::spawn(move || {
            broker.start().unwrap();
        });
    }

    fn create_rumqttd_config(addr: &str) -> rumqttd::Config {
        use rumqttd::{Config, ConnectionSettings, RouterConfig, ServerSettings};
        use std::collections::HashMap;
        use std::net::SocketAddr;

        let socket_addr: SocketAddr = addr.parse().unwrap();

        let mut servers = HashMap::new();
        servers.insert(
            "tcp".to_string(),
            ServerSettings {
                name: "tcp".to_string(),
                listen: socket_addr,
                tls: None,
                next_connection_delay_ms: 1,
                connections: ConnectionSettings {
                    connection_timeout_ms: 60000,
                    max_payload_size: 1024 * 1024,
                    max_inflight_count: 100,
                    auth: None,
                    external_auth: None,
                    dynamic_filters: false,
                },
            },
        );

        Config {
            id: 0,
            router: RouterConfig {
                max_connections: 1000,
                max_outgoing_packet_count: 200,
                max_segment_size: 1024 * 1024,
                max_segment_count: 10,
                ..Default::default()
            },
            v4: Some(servers),
            v5: None,
            ws: None,
            prometheus: None,
            metrics: None,
            console: None,
            bridge: None,
            cluster: None,
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_rumqttd() {
        let port = find_available_port();
        start_broker(port);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let client = Client::new(
            BrokerConfig::new("127.0.0.1", port).with_client_id("roomlink-test"),
        );
        let mut inbox = messages(&client);
        client.connect().await.unwrap();

        let codes = client
            .subscribe_and_wait(
                [Subscription::new("room1/+", QoS::AtLeastOnce)],
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(codes.len(), 1);

        let handle = client
            .publish_tracked(PublishRequest::new("room1/device3", "on").with_qos(QoS::AtLeastOnce))
            .await
            .unwrap();
        handle.wait_timeout(Duration::from_secs(2)).await.unwrap();

        assert_eq!(recv(&mut inbox).await, "Topic: room1/device3 Message: on");

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_without_broker() {
        let port = find_available_port();
        let client = Client::new(
            BrokerConfig::new("127.0.0.1", port).with_connect_timeout(Duration::from_secs(2)),
        );
        assert!(matches!(client.connect().await, Err(Error::Network(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
