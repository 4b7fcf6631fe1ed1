//! roomlink - A command line tool for room/device control over MQTT.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{BrokerOverrides, ConfigCommand, PubCommand, SubCommand, TopicsCommand};

/// roomlink - A command line tool for room/device control over MQTT.
///
/// Publishes control messages and listens on room/device topics:
///   - pub: send the configured sequence (or one message) and exit
///   - sub: print incoming messages until Ctrl-C
///
/// Configuration is stored in ~/.roomlink/config.yaml. Broker flags
/// override the file.
#[derive(Parser)]
#[command(name = "roomlink")]
#[command(about = "Room/device MQTT control tool")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.roomlink/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Broker host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Broker port
    #[arg(short = 'p', long, global = true)]
    pub port: Option<u16>,

    /// Keep-alive interval in seconds
    #[arg(long, global = true)]
    pub keep_alive: Option<u16>,

    /// MQTT client ID (default: random)
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn broker_overrides(&self) -> BrokerOverrides {
        BrokerOverrides {
            host: self.host.clone(),
            port: self.port,
            keep_alive: self.keep_alive,
            client_id: self.client_id.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish messages
    Pub(PubCommand),
    /// Subscribe and print messages
    Sub(SubCommand),
    /// Print the room/device topics
    Topics(TopicsCommand),
    /// Manage CLI configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Pub(cmd) => cmd.run(&cli).await,
        Commands::Sub(cmd) => cmd.run(&cli).await,
        Commands::Topics(cmd) => cmd.run(&cli).await,
        Commands::Config(cmd) => cmd.run(&cli).await,
    }
}
