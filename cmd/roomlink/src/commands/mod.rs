//! CLI commands module.

mod cli_config;
mod config;
mod publish;
mod subscribe;
mod topics;
mod util;

pub use cli_config::BrokerOverrides;
pub use config::ConfigCommand;
pub use publish::PubCommand;
pub use subscribe::SubCommand;
pub use topics::TopicsCommand;

// Re-export utils for use in commands
pub(crate) use util::*;
