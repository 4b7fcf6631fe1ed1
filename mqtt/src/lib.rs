//! MQTT client library for room/device topic control.
//!
//! This crate wraps rumqttc with a small connection manager: connect and
//! disconnect with explicit lifecycle states, ordered publishing with
//! per-message completion, subscriptions with a single message handler,
//! and expansion of a room/device table into `room/device` topics.
//!
//! # Example - Publish
//!
//! ```no_run
//! use roomlink_mqtt::{BrokerConfig, Client, PublishRequest};
//!
//! #[tokio::main]
//! async fn main() -> roomlink_mqtt::Result<()> {
//!     let client = Client::new(BrokerConfig::new("localhost", 1883));
//!     client.on_publish_complete(|id| println!("Message {} delivered", id));
//!     client.connect().await?;
//!
//!     client.publish(PublishRequest::new("westside/led1", "DOWN")).await?;
//!     client.publish(PublishRequest::new("westside/led2", "UP")).await?;
//!
//!     client.disconnect().await
//! }
//! ```
//!
//! # Example - Subscribe
//!
//! ```no_run
//! use roomlink_mqtt::{build_topics, BrokerConfig, Client, Message, QoS, RoomDeviceTable, Subscription};
//!
//! #[tokio::main]
//! async fn main() -> roomlink_mqtt::Result<()> {
//!     let table = RoomDeviceTable::new().with_room("room1", ["device1", "device2"]);
//!     let subs = build_topics(&table)?
//!         .into_iter()
//!         .map(|topic| Subscription::new(topic, QoS::AtMostOnce));
//!
//!     let client = Client::new(BrokerConfig::default());
//!     client.on_message(|msg: &Message| {
//!         println!("Topic: {} Message: {:?}", msg.topic, msg.payload_str());
//!     });
//!     client.connect().await?;
//!     client.subscribe(subs).await?;
//!
//!     client
//!         .run_until_cancelled(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod pending;
mod publisher;
mod subscriber;
#[cfg(test)]
mod tests;
mod topic;
mod transport;
mod types;

pub use client::Client;
pub use config::{
    BrokerConfig, DEFAULT_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE, DEFAULT_PORT,
};
pub use error::{Error, Result};
pub use publisher::{BatchMode, PublishHandle};
pub use subscriber::{Handler, Termination};
pub use topic::{build_topics, validate_filter, validate_topic, RoomDeviceTable, SEPARATOR};
pub use transport::{EventSource, Requester, RumqttTransport, Transport, TransportEvent};
pub use types::{
    ConnectReturnCode, ConnectionState, DisconnectReason, Message, MessageId, PublishRequest,
    QoS, SubscribeReturnCode, Subscription,
};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::{
        build_topics, BatchMode, BrokerConfig, Client, ConnectReturnCode, ConnectionState,
        DisconnectReason, Error, Handler, Message, MessageId, PublishRequest, QoS, Result,
        RoomDeviceTable, Subscription, Termination,
    };
}
