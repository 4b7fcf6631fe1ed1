//! Configuration management commands.

use clap::{Args, Subcommand};

use super::cli_config::{resolve_config_path, Config};
use super::{get_config, print_success};
use crate::Cli;

/// Manage CLI configuration.
///
/// Configuration is stored in ~/.roomlink/config.yaml
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Write the default configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// View the effective configuration
    View,
    /// Print the config file path
    Path,
}

impl ConfigCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.command {
            ConfigSubcommand::Init { force } => {
                let path = resolve_config_path(cli.config.as_deref())?;
                if path.exists() && !force {
                    anyhow::bail!(
                        "config file {} already exists, use --force to overwrite",
                        path.display()
                    );
                }

                let mut cfg = Config::default();
                cfg.apply_overrides(&cli.broker_overrides());
                cfg.set_path(path);
                cfg.save()?;
                print_success(&format!("Config written to {}", cfg.path().display()));
            }
            ConfigSubcommand::View => {
                let cfg = get_config(cli)?;
                print!("{}", serde_yaml::to_string(&cfg.masked())?);
            }
            ConfigSubcommand::Path => {
                println!("{}", resolve_config_path(cli.config.as_deref())?.display());
            }
        }
        Ok(())
    }
}
