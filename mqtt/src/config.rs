//! Broker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;
/// Default keep-alive interval in seconds.
pub const DEFAULT_KEEP_ALIVE: u16 = 60;
/// Default handshake timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;
/// Default capacity of the request channel towards the network loop.
pub const DEFAULT_CAPACITY: usize = 100;

/// Broker connection settings.
///
/// Plain value: the client copies it on construction and never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Keep-alive interval in seconds.
    pub keep_alive: u16,
    /// Client ID (random UUID when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Clean session flag.
    pub clean_session: bool,
    /// Username, handed to the transport as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password, handed to the transport as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Handshake timeout in seconds.
    pub connect_timeout: u64,
    /// Bound of the outgoing request queue. A full queue makes publish wait.
    pub capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            client_id: None,
            clean_session: true,
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl BrokerConfig {
    /// Config for `host:port` with default settings otherwise.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse a broker URL.
    ///
    /// Address format: `mqtt://[user:pass@]host[:port]` (`tcp://` is accepted too).
    pub fn from_url(addr: &str) -> Result<Self> {
        let url = url::Url::parse(addr).map_err(|e| Error::InvalidConfig(e.to_string()))?;

        match url.scheme() {
            "mqtt" | "tcp" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unsupported scheme {other:?}, expected mqtt:// or tcp://"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidConfig(format!("missing host in {addr:?}")))?;

        let mut config = Self::new(host, url.port().unwrap_or(DEFAULT_PORT));

        // Set credentials from URL
        if !url.username().is_empty() {
            config.username = Some(url.username().to_string());
            config.password = url.password().map(str::to_string);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set the client ID.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set clean session flag.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the handshake timeout.
    ///
    /// Stored in whole seconds; a fractional part rounds up, so 1500 ms
    /// becomes 2 s and anything below a second becomes 1 s.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.connect_timeout = secs.max(1);
        self
    }

    /// Set the request queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive))
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Configured client ID, or a fresh random one.
    pub fn resolve_client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        }
    }

    /// Check ranges before any connection attempt.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port must be in 1..=65535".to_string()));
        }
        if self.keep_alive == 0 {
            return Err(Error::InvalidConfig("keep_alive must be greater than 0".to_string()));
        }
        if self.connect_timeout == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be greater than 0".to_string()));
        }
        if matches!(&self.client_id, Some(id) if id.starts_with(char::is_whitespace)) {
            return Err(Error::InvalidConfig(
                "client_id must not start with whitespace".to_string(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::InvalidConfig("password set without username".to_string()));
        }
        Ok(())
    }
}
