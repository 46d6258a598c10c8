use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use eyre::Result as EyreResult;

use crate::config::Config;
use crate::defaults;
use crate::runner;

pub const EXAMPLES: &str = r"
  # Run the daemon against the default config path
  $ dirsyncd run

  # Validate a config file without starting any source
  $ dirsyncd --config ./config.toml check-config
";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(after_help = EXAMPLES)]
pub struct RootCommand {
    #[command(flatten)]
    pub args: RootArgs,

    #[command(subcommand)]
    pub action: SubCommands,
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Path to the TOML config file
    #[arg(long, value_name = "PATH", default_value_t = defaults::default_config_path())]
    #[arg(env = "DIRSYNCD_CONFIG", hide_env_values = true)]
    pub config: Utf8PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum SubCommands {
    /// Load the config, spawn one task per configured source, and run
    /// until shutdown.
    Run,
    /// Load and validate the config, then exit.
    CheckConfig,
}

impl RootCommand {
    pub async fn run(self) -> EyreResult<()> {
        match self.action {
            SubCommands::Run => {
                let config = Config::load(&self.args.config)?;
                runner::run(config).await
            }
            SubCommands::CheckConfig => {
                let config = Config::load(&self.args.config)?;
                tracing::info!(sources = config.sources.len(), "config is valid");
                Ok(())
            }
        }
    }
}
