//! Transport seam between the client and the MQTT protocol library.
//!
//! A transport is opened once per session and splits into two halves:
//! a [`Requester`] used by callers to queue outgoing packets, and an
//! [`EventSource`] drained by the session's network loop. The default
//! [`RumqttTransport`] maps these onto `rumqttc::AsyncClient` and
//! `rumqttc::EventLoop`; wire framing, keep-alive pings and QoS
//! retransmission all stay inside rumqttc.

use async_trait::async_trait;
use rumqttc::mqttbytes::v4::SubscribeReasonCode;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, SubscribeFilter};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::types::{ConnectReturnCode, Message, PublishRequest, SubscribeReturnCode, Subscription};

/// Protocol event surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// CONNACK received.
    ConnAck {
        code: ConnectReturnCode,
        session_present: bool,
    },
    /// A QoS 1/2 PUBLISH was written with this packet id.
    PublishSent { pkid: u16 },
    /// PUBACK received (QoS 1 delivery confirmed).
    PubAck { pkid: u16 },
    /// PUBCOMP received (QoS 2 handshake complete).
    PubComp { pkid: u16 },
    /// A SUBSCRIBE was written with this packet id.
    SubscribeSent { pkid: u16 },
    /// SUBACK received.
    SubAck {
        pkid: u16,
        codes: Vec<SubscribeReturnCode>,
    },
    /// Inbound PUBLISH.
    Message(Message),
    /// Our DISCONNECT was written.
    DisconnectSent,
    /// Broker sent DISCONNECT.
    BrokerDisconnect,
    /// Anything the client does not act on (pings, PUBREC, ...).
    Other,
}

/// Outgoing half of an open transport.
///
/// Calls only queue work for the network loop. They may wait while the
/// queue is full.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<()>;

    /// Subscribe to all filters, possibly in a single SUBSCRIBE packet.
    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Incoming half of an open transport, driven by the network loop.
#[async_trait]
pub trait EventSource: Send {
    /// Next protocol event. The first call performs the network connect
    /// and the CONNECT handshake.
    async fn poll(&mut self) -> Result<TransportEvent>;
}

/// Factory of transport sessions.
pub trait Transport: Send + Sync {
    fn open(&self, config: &BrokerConfig) -> Result<(Box<dyn Requester>, Box<dyn EventSource>)>;
}

/// Transport backed by rumqttc (MQTT 3.1.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttTransport;

impl Transport for RumqttTransport {
    fn open(&self, config: &BrokerConfig) -> Result<(Box<dyn Requester>, Box<dyn EventSource>)> {
        config.validate()?;

        let mut mqtt_options =
            MqttOptions::new(config.resolve_client_id(), config.host.clone(), config.port);
        mqtt_options.set_keep_alive(config.keep_alive_duration());
        mqtt_options.set_clean_session(config.clean_session);

        if let Some(username) = &config.username {
            mqtt_options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, config.capacity);

        Ok((
            Box::new(RumqttRequester { client }),
            Box::new(RumqttEvents { event_loop }),
        ))
    }
}

struct RumqttRequester {
    client: AsyncClient,
}

#[async_trait]
impl Requester for RumqttRequester {
    async fn publish(&self, request: &PublishRequest) -> Result<()> {
        self.client
            .publish(
                request.topic.clone(),
                request.qos.into(),
                request.retain,
                request.payload.to_vec(),
            )
            .await?;
        Ok(())
    }

    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()> {
        let filters = subscriptions
            .iter()
            .map(|sub| SubscribeFilter::new(sub.filter.clone(), sub.qos.into()));
        self.client.subscribe_many(filters).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

struct RumqttEvents {
    event_loop: EventLoop,
}

#[async_trait]
impl EventSource for RumqttEvents {
    async fn poll(&mut self) -> Result<TransportEvent> {
        let event = self.event_loop.poll().await?;
        Ok(map_event(event))
    }
}

fn map_event(event: Event) -> TransportEvent {
    match event {
        Event::Incoming(Incoming::ConnAck(ack)) => TransportEvent::ConnAck {
            code: ack.code.into(),
            session_present: ack.session_present,
        },
        Event::Incoming(Incoming::Publish(publish)) => TransportEvent::Message(Message {
            topic: String::from_utf8_lossy(publish.topic.as_ref()).into_owned(),
            payload: publish.payload,
            qos: publish.qos.into(),
            retain: publish.retain,
        }),
        Event::Incoming(Incoming::PubAck(ack)) => TransportEvent::PubAck { pkid: ack.pkid },
        Event::Incoming(Incoming::PubComp(comp)) => TransportEvent::PubComp { pkid: comp.pkid },
        Event::Incoming(Incoming::SubAck(ack)) => TransportEvent::SubAck {
            pkid: ack.pkid,
            codes: ack
                .return_codes
                .iter()
                .map(|code| match code {
                    SubscribeReasonCode::Success(qos) => SubscribeReturnCode::Granted((*qos).into()),
                    SubscribeReasonCode::Failure => SubscribeReturnCode::Failure,
                })
                .collect(),
        },
        Event::Incoming(Incoming::Disconnect) => TransportEvent::BrokerDisconnect,
        // QoS 0 publishes carry packet id 0 and are never acknowledged.
        Event::Outgoing(Outgoing::Publish(pkid)) if pkid != 0 => {
            TransportEvent::PublishSent { pkid }
        }
        Event::Outgoing(Outgoing::Subscribe(pkid)) => TransportEvent::SubscribeSent { pkid },
        Event::Outgoing(Outgoing::Disconnect) => TransportEvent::DisconnectSent,
        _ => TransportEvent::Other,
    }
}
