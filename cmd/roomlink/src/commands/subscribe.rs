//! Subscribe command.

use std::time::Duration;

use clap::Args;
use roomlink_mqtt::{build_topics, Message, QoS, Subscription, Termination};

use super::cli_config::Config;
use super::{create_client, get_config, parse_qos, print_info, print_success, print_warning};
use crate::Cli;

const SUBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscribe and print incoming messages until Ctrl-C.
///
/// Listens on the control filter, every room/device topic and any extra
/// filters. Each message is printed as `Topic: <topic> Message: <payload>`.
#[derive(Args)]
pub struct SubCommand {
    /// Skip the room/device topics
    #[arg(long)]
    no_rooms: bool,

    /// Skip the control filter
    #[arg(long)]
    no_control: bool,

    /// Extra topic filter (repeatable)
    #[arg(long = "filter", value_name = "FILTER")]
    filters: Vec<String>,

    /// QoS for room topics and extra filters (0, 1 or 2)
    #[arg(long, default_value = "0", value_parser = parse_qos)]
    qos: QoS,
}

impl SubCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = get_config(cli)?;
        let subscriptions = self.subscriptions(&cfg)?;
        if subscriptions.is_empty() {
            anyhow::bail!("nothing to subscribe to");
        }
        let count = subscriptions.len();

        let client = create_client(&cfg);
        client.on_message(|msg: &Message| {
            println!(
                "Topic: {} Message: {}",
                msg.topic,
                String::from_utf8_lossy(&msg.payload)
            );
        });

        client.connect().await?;
        client
            .subscribe_and_wait(subscriptions, SUBACK_TIMEOUT)
            .await?;
        print_info(&format!(
            "Listening on {} filter(s) at {}, press Ctrl-C to stop",
            count,
            cfg.broker.addr()
        ));

        let termination = client
            .run_until_cancelled(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    print_warning(&format!("cannot listen for Ctrl-C: {}", e));
                    std::future::pending::<()>().await;
                }
            })
            .await?;

        match termination {
            Termination::Cancelled => {
                print_success("Disconnected");
                Ok(())
            }
            Termination::Disconnected(reason) => anyhow::bail!("connection closed: {}", reason),
        }
    }

    fn subscriptions(&self, cfg: &Config) -> anyhow::Result<Vec<Subscription>> {
        let mut subs = Vec::new();

        if !self.no_control {
            subs.push(cfg.control.clone());
        }
        if !self.no_rooms {
            subs.extend(
                build_topics(&cfg.rooms)?
                    .into_iter()
                    .map(|topic| Subscription::new(topic, self.qos)),
            );
        }
        subs.extend(
            self.filters
                .iter()
                .map(|filter| Subscription::new(filter.clone(), self.qos)),
        );

        Ok(subs)
    }
}
