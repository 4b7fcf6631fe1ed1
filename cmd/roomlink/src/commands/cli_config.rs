//! CLI configuration file.
//!
//! Configuration is stored in ~/.roomlink/config.yaml. A missing file
//! means the built-in defaults.

use std::path::{Path, PathBuf};

use roomlink_mqtt::{BrokerConfig, PublishRequest, QoS, RoomDeviceTable, Subscription};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_DIR: &str = ".roomlink";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings.
    pub broker: BrokerConfig,

    /// Rooms and their devices, one topic per device.
    pub rooms: RoomDeviceTable,

    /// Filter the subscriber listens on for control messages.
    pub control: Subscription,

    /// Messages sent by `roomlink pub`, in order.
    pub sequence: Vec<PublishEntry>,

    #[serde(skip)]
    config_path: PathBuf,
}

/// One configured message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishEntry {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retain: bool,
}

impl PublishEntry {
    fn new(topic: &str, payload: &str) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn to_request(&self) -> PublishRequest {
        PublishRequest::new(self.topic.clone(), self.payload.clone())
            .with_qos(self.qos)
            .with_retain(self.retain)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            rooms: RoomDeviceTable::new()
                .with_room("room1", ["device1", "device2", "device3", "device4", "device5"])
                .with_room("room2", ["device1", "device2", "device3", "device4"]),
            control: Subscription::new("westside/#", QoS::AtLeastOnce),
            sequence: vec![
                PublishEntry::new("westside/led1", "DOWN"),
                PublishEntry::new("westside/led2", "UP"),
                PublishEntry::new("westside/led3", "DOWN"),
            ],
            config_path: PathBuf::new(),
        }
    }
}

/// Broker settings given on the command line.
#[derive(Debug, Clone, Default)]
pub struct BrokerOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub keep_alive: Option<u16>,
    pub client_id: Option<String>,
}

impl Config {
    /// Gets the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR).join(DEFAULT_CONFIG_FILE))
    }

    /// Returns the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn set_path(&mut self, path: PathBuf) {
        self.config_path = path;
    }

    /// Apply command line settings on top of the file values.
    pub fn apply_overrides(&mut self, overrides: &BrokerOverrides) {
        if let Some(host) = &overrides.host {
            self.broker.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.broker.port = port;
        }
        if let Some(keep_alive) = overrides.keep_alive {
            self.broker.keep_alive = keep_alive;
        }
        if let Some(client_id) = &overrides.client_id {
            self.broker.client_id = Some(client_id.clone());
        }
    }

    /// Returns a copy safe to print, with the broker password masked.
    pub fn masked(&self) -> Config {
        let mut cfg = self.clone();
        if let Some(password) = &cfg.broker.password {
            cfg.broker.password = Some(mask_secret(password));
        }
        cfg
    }

    /// Saves the configuration to disk, creating the directory if needed.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }
}

/// Masks a secret for display, keeping the first and last 4 characters
/// of long values.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}

/// Resolves the config file path: `custom_path` or the default location.
pub fn resolve_config_path(custom_path: Option<&str>) -> anyhow::Result<PathBuf> {
    match custom_path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Config::default_config_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path")),
    }
}

/// Loads the configuration, falling back to defaults when the file is missing.
pub fn load_config(custom_path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = resolve_config_path(custom_path)?;

    let mut cfg: Config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", config_path.display(), e))?
    } else {
        Config::default()
    };

    cfg.config_path = config_path;
    Ok(cfg)
}
