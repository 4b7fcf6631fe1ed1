//! Publish command.

use std::collections::HashSet;
use std::time::Duration;

use clap::Args;
use roomlink_mqtt::{BatchMode, Client, MessageId, PublishRequest, QoS};
use tokio::sync::mpsc;

use super::cli_config::Config;
use super::{create_client, get_config, parse_qos, print_info, print_success};
use crate::Cli;

/// How long to wait for outstanding completions before giving up.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

/// Publish the configured sequence, or a single message.
///
/// Connects, publishes in order, waits until every message is complete
/// and disconnects.
#[derive(Args)]
pub struct PubCommand {
    /// Topic of a single message (default: the configured sequence)
    #[arg(short = 't', long, requires = "message")]
    topic: Option<String>,

    /// Payload of the single message
    #[arg(short = 'm', long, requires = "topic")]
    message: Option<String>,

    /// QoS of the single message (0, 1 or 2)
    #[arg(long, default_value = "0", value_parser = parse_qos)]
    qos: QoS,

    /// Retain the single message
    #[arg(long)]
    retain: bool,

    /// Wait for each message to complete before sending the next
    #[arg(long)]
    await_ack: bool,
}

impl PubCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = get_config(cli)?;
        let requests = self.requests(&cfg);
        if requests.is_empty() {
            print_info("Nothing to publish");
            return Ok(());
        }

        let client = create_client(&cfg);
        let (tx, completed) = mpsc::unbounded_channel();
        client.on_publish_complete(move |id| {
            let _ = tx.send(id);
        });

        client.connect().await?;
        let outcome = self.publish_all(&client, requests, completed).await;
        client.disconnect().await?;

        let count = outcome?;
        print_success(&format!(
            "Published {} message(s) to {}",
            count,
            cfg.broker.addr()
        ));
        Ok(())
    }

    fn requests(&self, cfg: &Config) -> Vec<PublishRequest> {
        match (&self.topic, &self.message) {
            (Some(topic), Some(message)) => vec![
                PublishRequest::new(topic.clone(), message.clone())
                    .with_qos(self.qos)
                    .with_retain(self.retain),
            ],
            _ => cfg.sequence.iter().map(|entry| entry.to_request()).collect(),
        }
    }

    fn mode(&self) -> BatchMode {
        if self.await_ack {
            BatchMode::AwaitEach
        } else {
            BatchMode::Pipelined
        }
    }

    async fn publish_all(
        &self,
        client: &Client,
        requests: Vec<PublishRequest>,
        mut completed: mpsc::UnboundedReceiver<MessageId>,
    ) -> anyhow::Result<usize> {
        let ids = client.publish_batch(requests, self.mode()).await?;

        let mut outstanding: HashSet<MessageId> = ids.iter().copied().collect();
        let wait = async {
            while !outstanding.is_empty() {
                match completed.recv().await {
                    Some(id) => {
                        outstanding.remove(&id);
                    }
                    None => break,
                }
            }
        };
        if tokio::time::timeout(COMPLETION_TIMEOUT, wait).await.is_err() {
            anyhow::bail!(
                "{} message(s) not acknowledged within {:?}",
                outstanding.len(),
                COMPLETION_TIMEOUT
            );
        }
        Ok(ids.len())
    }
}
