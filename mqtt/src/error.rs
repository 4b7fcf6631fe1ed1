//! Error types for the MQTT client.

use thiserror::Error;

use crate::types::ConnectReturnCode;

/// Error type for MQTT operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure: DNS, refused socket, timeout, I/O.
    ///
    /// Never retried by this crate; the caller owns the retry policy.
    #[error("mqtt: network error: {0}")]
    Network(String),

    /// Broker answered the CONNECT handshake with a non-zero result code.
    #[error("mqtt: connection refused: {0}")]
    ConnectionRefused(ConnectReturnCode),

    /// Operation attempted while the client is not connected.
    #[error("mqtt: not connected")]
    NotConnected,

    /// Room or device name that cannot be turned into a topic segment.
    #[error("mqtt: invalid table entry {}: {reason}", entry_name(.room, .device))]
    InvalidTableEntry {
        room: String,
        device: Option<String>,
        reason: &'static str,
    },

    /// Batch publish halted at `index`; `issued` requests went out before it.
    #[error("mqtt: batch publish failed at index {index} ({issued} issued): {source}")]
    PublishBatchPartialFailure {
        index: usize,
        issued: usize,
        #[source]
        source: Box<Error>,
    },

    /// Topic name not usable for PUBLISH.
    #[error("mqtt: invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Topic filter not usable for SUBSCRIBE.
    #[error("mqtt: invalid topic filter: {0:?}")]
    InvalidTopicFilter(String),

    /// Broker refused a subscription in its SUBACK.
    #[error("mqtt: subscription rejected: {0}")]
    SubscribeRejected(String),

    /// Invalid broker configuration.
    #[error("mqtt: invalid config: {0}")]
    InvalidConfig(String),

    /// Waiting for an acknowledgment took too long.
    #[error("mqtt: timed out waiting for {0}")]
    Timeout(&'static str),
}

impl Error {
    /// Index and issued count of a failed batch publish.
    pub fn batch_progress(&self) -> Option<(usize, usize)> {
        match self {
            Error::PublishBatchPartialFailure { index, issued, .. } => Some((*index, *issued)),
            _ => None,
        }
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(e: rumqttc::ClientError) -> Self {
        // The request channel only fails once the event loop is gone.
        Error::Network(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for Error {
    fn from(e: rumqttc::ConnectionError) -> Self {
        match e {
            rumqttc::ConnectionError::ConnectionRefused(code) => {
                Error::ConnectionRefused(ConnectReturnCode::from(code))
            }
            other => Error::Network(other.to_string()),
        }
    }
}

fn entry_name(room: &str, device: &Option<String>) -> String {
    match device {
        Some(device) => format!("{room:?}/{device:?}"),
        None => format!("{room:?}"),
    }
}

/// Result type for MQTT operations.
pub type Result<T> = std::result::Result<T, Error>;
