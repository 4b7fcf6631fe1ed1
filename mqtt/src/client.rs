//! MQTT client: connection lifecycle and the per-session network loop.
//!
//! A [`Client`] owns at most one live session at a time. Each successful
//! [`Client::connect`] opens a fresh transport session and spawns a task
//! that drains its events; publish/subscribe bookkeeping lives in the
//! session and is discarded with it.
//!
//! Observers and the message handler run on that task. They must return
//! promptly: while one runs, nothing else is read from or written to the
//! broker for this client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::pending::PendingAcks;
use crate::subscriber::Handler;
use crate::transport::{EventSource, Requester, RumqttTransport, Transport, TransportEvent};
use crate::types::{
    ConnectReturnCode, ConnectionState, DisconnectReason, Message, MessageId, QoS,
    SubscribeReturnCode,
};

/// How long `disconnect` waits for the DISCONNECT packet to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type ConnectObserver = Arc<dyn Fn(ConnectReturnCode) + Send + Sync>;
type DisconnectObserver = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;
type PublishObserver = Arc<dyn Fn(MessageId) + Send + Sync>;

/// Single-slot observer registrations; a new registration replaces the old one.
#[derive(Default)]
struct Observers {
    connect_result: RwLock<Option<ConnectObserver>>,
    disconnect: RwLock<Option<DisconnectObserver>>,
    publish_complete: RwLock<Option<PublishObserver>>,
    handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl Observers {
    // Clone out of the lock before calling so observers may re-register.

    fn connect_result(&self, code: ConnectReturnCode) {
        let observer = self.connect_result.read().clone();
        if let Some(observer) = observer {
            observer(code);
        }
    }

    fn disconnect(&self, reason: &DisconnectReason) {
        let observer = self.disconnect.read().clone();
        if let Some(observer) = observer {
            observer(reason);
        }
    }

    fn publish_complete(&self, id: MessageId) {
        let observer = self.publish_complete.read().clone();
        match observer {
            Some(observer) => observer(id),
            None => debug!("No publish observer, dropping completion of {}", id),
        }
    }

    fn message(&self, msg: &Message) {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.handle_message(msg),
            None => debug!("No message handler, dropping message on {}", msg.topic),
        }
    }
}

/// Publish waiting for its completion.
pub(crate) struct PendingPublish {
    pub(crate) id: MessageId,
    pub(crate) done: Option<oneshot::Sender<Result<()>>>,
}

/// SUBSCRIBE waiting for its SUBACK.
pub(crate) struct PendingSubscribe {
    pub(crate) filters: Vec<String>,
    pub(crate) done: Option<oneshot::Sender<Vec<SubscribeReturnCode>>>,
}

/// State private to one connection.
pub(crate) struct Session {
    pub(crate) requester: Box<dyn Requester>,
    /// Held while handing a request to the transport, so requests keep
    /// their issue order and ack bookkeeping stays aligned with it.
    pub(crate) send_lock: tokio::sync::Mutex<()>,
    pub(crate) publishes: Mutex<PendingAcks<PendingPublish>>,
    pub(crate) subscribes: Mutex<PendingAcks<PendingSubscribe>>,
    pub(crate) subscriptions: Mutex<HashMap<String, QoS>>,
    /// QoS 0 completions, delivered from the network loop like real acks.
    synthetic: mpsc::UnboundedSender<PendingPublish>,
    closing: AtomicBool,
    shutdown: CancellationToken,
}

impl Session {
    fn new(requester: Box<dyn Requester>) -> (Self, mpsc::UnboundedReceiver<PendingPublish>) {
        let (synthetic, synthetic_rx) = mpsc::unbounded_channel();
        let session = Self {
            requester,
            send_lock: tokio::sync::Mutex::new(()),
            publishes: Mutex::new(PendingAcks::default()),
            subscribes: Mutex::new(PendingAcks::default()),
            subscriptions: Mutex::new(HashMap::new()),
            synthetic,
            closing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        };
        (session, synthetic_rx)
    }

    /// Queue a fire-and-forget completion for the network loop.
    pub(crate) fn complete_synthetic(&self, publish: PendingPublish) {
        if let Err(mpsc::error::SendError(publish)) = self.synthetic.send(publish) {
            // Loop already gone; the waiter sees the session end.
            debug!("Session ended before completion of {}", publish.id);
        }
    }

    fn fail_pending(&self) {
        let pending = self.publishes.lock().len() + self.subscribes.lock().len();
        if pending > 0 {
            debug!("Session ended with {} requests awaiting acknowledgment", pending);
        }

        for publish in self.publishes.lock().drain() {
            if let Some(done) = publish.done {
                let _ = done.send(Err(Error::NotConnected));
            }
        }
        // Dropping the senders wakes subscribe waiters.
        self.subscribes.lock().drain();
        self.subscriptions.lock().clear();
    }
}

pub(crate) struct Inner {
    state: watch::Sender<ConnectionState>,
    observers: Observers,
    session: RwLock<Option<Arc<Session>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_reason: Mutex<Option<DisconnectReason>>,
    next_message_id: AtomicU64,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Inner {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            observers: Observers::default(),
            session: RwLock::new(None),
            task: Mutex::new(None),
            last_reason: Mutex::new(None),
            next_message_id: AtomicU64::new(1),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Session accepting new requests, or `NotConnected`.
    pub(crate) fn connected_session(&self) -> Result<Arc<Session>> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        match self.session.read().as_ref() {
            Some(session) if !session.closing.load(Ordering::SeqCst) => Ok(session.clone()),
            _ => Err(Error::NotConnected),
        }
    }

    pub(crate) fn handler_slot(&self) -> &RwLock<Option<Arc<dyn Handler>>> {
        &self.observers.handler
    }

    pub(crate) fn next_message_id(&self) -> MessageId {
        MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    fn complete_publish(&self, publish: PendingPublish) {
        info!("Publish {} complete", publish.id);
        if let Some(done) = publish.done {
            let _ = done.send(Ok(()));
        }
        self.observers.publish_complete(publish.id);
    }

    fn dispatch(&self, session: &Session, event: TransportEvent) {
        match event {
            TransportEvent::PublishSent { pkid } => {
                if !session.publishes.lock().bind(pkid) {
                    debug!("Untracked publish sent with packet id {}", pkid);
                }
            }
            TransportEvent::PubAck { pkid } | TransportEvent::PubComp { pkid } => {
                let publish = session.publishes.lock().complete(pkid);
                match publish {
                    Some(publish) => self.complete_publish(publish),
                    None => debug!("Acknowledgment for unknown packet id {}", pkid),
                }
            }
            TransportEvent::SubscribeSent { pkid } => {
                if !session.subscribes.lock().bind(pkid) {
                    debug!("Untracked subscribe sent with packet id {}", pkid);
                }
            }
            TransportEvent::SubAck { pkid, codes } => {
                debug!("Subscription acknowledged: pkid={} codes={:?}", pkid, codes);
                let Some(pending) = session.subscribes.lock().complete(pkid) else {
                    debug!("SUBACK for unknown packet id {}", pkid);
                    return;
                };

                for (filter, code) in pending.filters.iter().zip(&codes) {
                    if *code == SubscribeReturnCode::Failure {
                        warn!("Broker rejected subscription to {}", filter);
                        session.subscriptions.lock().remove(filter);
                    }
                }
                if let Some(done) = pending.done {
                    let _ = done.send(codes);
                }
            }
            TransportEvent::Message(msg) => {
                info!(
                    "Topic: {} Message: {}",
                    msg.topic,
                    String::from_utf8_lossy(&msg.payload)
                );
                self.observers.message(&msg);
            }
            TransportEvent::ConnAck { code, .. } => {
                debug!("Ignoring CONNACK ({}) on an established session", code);
            }
            TransportEvent::DisconnectSent
            | TransportEvent::BrokerDisconnect
            | TransportEvent::Other => {}
        }
    }

    /// Tear down `session` if it is still the current one.
    ///
    /// Runs at most once per session, whichever side ends it first.
    fn end_session(&self, session: &Arc<Session>, reason: DisconnectReason) {
        {
            let mut current = self.session.write();
            match current.as_ref() {
                Some(s) if Arc::ptr_eq(s, session) => *current = None,
                _ => return,
            }
        }

        session.closing.store(true, Ordering::SeqCst);
        session.fail_pending();
        *self.last_reason.lock() = Some(reason.clone());
        self.set_state(ConnectionState::Disconnected);

        match &reason {
            DisconnectReason::ClientRequested => info!("Disconnected from MQTT broker"),
            DisconnectReason::BrokerClosed => warn!("Disconnected from MQTT broker: {}", reason),
            DisconnectReason::ConnectionLost(_) => {
                error!("Disconnected from MQTT broker: {}", reason)
            }
        }
        self.observers.disconnect(&reason);
    }
}

async fn run_event_loop(
    inner: Arc<Inner>,
    session: Arc<Session>,
    mut events: Box<dyn EventSource>,
    mut synthetic: mpsc::UnboundedReceiver<PendingPublish>,
) {
    let reason = loop {
        tokio::select! {
            _ = session.shutdown.cancelled() => {
                debug!("Connection shutdown requested");
                break DisconnectReason::ClientRequested;
            }
            Some(publish) = synthetic.recv() => inner.complete_publish(publish),
            event = events.poll() => match event {
                Ok(TransportEvent::DisconnectSent) => break DisconnectReason::ClientRequested,
                Ok(TransportEvent::BrokerDisconnect) => break DisconnectReason::BrokerClosed,
                Ok(event) => inner.dispatch(&session, event),
                Err(e) => break DisconnectReason::ConnectionLost(e.to_string()),
            },
        }
    };

    // These were handed to the transport before the session ended.
    while let Ok(publish) = synthetic.try_recv() {
        inner.complete_publish(publish);
    }
    inner.end_session(&session, reason);
}

async fn wait_connack(events: &mut dyn EventSource) -> Result<ConnectReturnCode> {
    loop {
        if let TransportEvent::ConnAck { code, .. } = events.poll().await? {
            return Ok(code);
        }
    }
}

/// MQTT client bound to one broker configuration.
///
/// # Example
///
/// ```no_run
/// use roomlink_mqtt::{BrokerConfig, Client, PublishRequest};
///
/// #[tokio::main]
/// async fn main() -> roomlink_mqtt::Result<()> {
///     let client = Client::new(BrokerConfig::new("localhost", 1883));
///     client.connect().await?;
///     client.publish(PublishRequest::new("westside/led1", "DOWN")).await?;
///     client.disconnect().await
/// }
/// ```
pub struct Client {
    config: BrokerConfig,
    transport: Arc<dyn Transport>,
    pub(crate) inner: Arc<Inner>,
}

impl Client {
    /// Create a disconnected client using the rumqttc transport.
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_transport(config, Arc::new(RumqttTransport))
    }

    /// Create a disconnected client using a custom transport.
    pub fn with_transport(config: BrokerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            inner: Arc::new(Inner::new()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reason the most recent session ended, if any.
    pub fn last_disconnect_reason(&self) -> Option<DisconnectReason> {
        self.inner.last_reason.lock().clone()
    }

    /// Observe every CONNACK result code, accepted or not.
    pub fn on_connect_result<F>(&self, f: F)
    where
        F: Fn(ConnectReturnCode) + Send + Sync + 'static,
    {
        *self.inner.observers.connect_result.write() = Some(Arc::new(f));
    }

    /// Observe the end of each session.
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        *self.inner.observers.disconnect.write() = Some(Arc::new(f));
    }

    /// Observe publish completions.
    ///
    /// Completions with no observer registered are dropped.
    pub fn on_publish_complete<F>(&self, f: F)
    where
        F: Fn(MessageId) + Send + Sync + 'static,
    {
        *self.inner.observers.publish_complete.write() = Some(Arc::new(f));
    }

    /// Connect and perform the MQTT handshake.
    ///
    /// Resolves once the broker's CONNACK arrives, so requests can be
    /// issued right away. Does nothing if already connected.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.state() == ConnectionState::Connected {
            debug!("Already connected to {}", self.config.addr());
            return Ok(());
        }

        self.config.validate()?;
        self.inner.set_state(ConnectionState::Connecting);

        match self.handshake().await {
            Ok((requester, events)) => {
                let (session, synthetic) = Session::new(requester);
                let session = Arc::new(session);

                *self.inner.session.write() = Some(session.clone());
                *self.inner.last_reason.lock() = None;
                self.inner.set_state(ConnectionState::Connected);

                let task = tokio::spawn(run_event_loop(
                    self.inner.clone(),
                    session,
                    events,
                    synthetic,
                ));
                *self.inner.task.lock() = Some(task);
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(Box<dyn Requester>, Box<dyn EventSource>)> {
        let addr = self.config.addr();
        info!("Establishing a connection to the MQTT broker {}", addr);

        let (requester, mut events) = self.transport.open(&self.config)?;
        let timeout = self.config.connect_timeout_duration();

        let code = match tokio::time::timeout(timeout, wait_connack(events.as_mut())).await {
            Ok(Ok(code)) => code,
            Ok(Err(Error::ConnectionRefused(code))) => code,
            Ok(Err(e)) => {
                error!("Connection to MQTT broker {} failed: {}", addr, e);
                return Err(e);
            }
            Err(_) => {
                error!("Connection to MQTT broker {} timed out", addr);
                return Err(Error::Network(format!(
                    "connect to {} timed out after {:?}",
                    addr, timeout
                )));
            }
        };

        self.inner.observers.connect_result(code);

        if !code.is_accepted() {
            warn!(
                "Bad connection to MQTT broker {} replied with result code {}",
                addr,
                code.code()
            );
            return Err(Error::ConnectionRefused(code));
        }

        info!(
            "Connected to MQTT broker {} replied with result code {}",
            addr,
            code.code()
        );
        Ok((requester, events))
    }

    /// Gracefully close the connection.
    ///
    /// Sends DISCONNECT, waits briefly for it to be flushed, then stops the
    /// network loop. A no-op when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let session = self.inner.session.read().clone();
        let Some(session) = session else {
            debug!("Disconnect requested while not connected");
            return Ok(());
        };

        session.closing.store(true, Ordering::SeqCst);
        if let Err(e) = session.requester.disconnect().await {
            debug!("DISCONNECT not queued: {}", e);
            session.shutdown.cancel();
        }

        let task = self.inner.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                debug!("DISCONNECT not flushed in {:?}, stopping loop", DISCONNECT_GRACE);
                session.shutdown.cancel();
                let _ = task.await;
            }
        }

        self.inner.end_session(&session, DisconnectReason::ClientRequested);
        Ok(())
    }

    /// Resolve once the client is in the `Disconnected` state.
    pub async fn wait_disconnected(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(session) = self.inner.session.read().as_ref() {
            session.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.config.addr())
            .field("state", &self.state())
            .finish()
    }
}
