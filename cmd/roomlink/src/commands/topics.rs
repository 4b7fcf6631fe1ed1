//! Topics command.

use clap::Args;
use roomlink_mqtt::build_topics;

use super::get_config;
use crate::Cli;

/// Print the room/device topics built from the configuration
#[derive(Args)]
pub struct TopicsCommand {}

impl TopicsCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = get_config(cli)?;
        for topic in build_topics(&cfg.rooms)? {
            println!("{}", topic);
        }
        Ok(())
    }
}
