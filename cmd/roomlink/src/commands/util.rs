//! Utility functions for CLI commands.

use roomlink_mqtt::{Client, QoS};

use super::cli_config::{load_config, Config};
use crate::Cli;

/// Gets the effective configuration: file values with command line overrides.
pub fn get_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = load_config(cli.config.as_deref())?;
    tracing::debug!("Using config {}", cfg.path().display());
    cfg.apply_overrides(&cli.broker_overrides());
    cfg.broker.validate()?;
    Ok(cfg)
}

/// Creates an MQTT client from the configuration.
pub fn create_client(cfg: &Config) -> Client {
    Client::new(cfg.broker.clone())
}

/// Parses a `--qos` argument.
pub fn parse_qos(s: &str) -> Result<QoS, String> {
    let level: u8 = s.parse().map_err(|_| format!("invalid QoS {s:?}"))?;
    QoS::try_from(level).map_err(|e| e.to_string())
}

/// Prints success message.
pub fn print_success(msg: &str) {
    eprintln!("\x1b[32m✓\x1b[0m {}", msg);
}

/// Prints info message.
pub fn print_info(msg: &str) {
    eprintln!("\x1b[34mℹ\x1b[0m {}", msg);
}

/// Prints warning message.
pub fn print_warning(msg: &str) {
    eprintln!("\x1b[33m⚠\x1b[0m {}", msg);
}
