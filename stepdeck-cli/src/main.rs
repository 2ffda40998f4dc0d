//! Stepdeck CLI
//!
//! Operator console for launching, watching and recovering workflow pipelines.

mod commands;
mod console;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, handle_command};
use std::path::PathBuf;
use std::time::Duration;
use stepdeck_engine::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::console::Console;

#[derive(Parser)]
#[command(name = "stepdeck")]
#[command(about = "Operator console for workflow pipelines", long_about = None)]
struct Cli {
    /// Pipeline definition directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Workflow service endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Known environments (comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    environments: Vec<String>,

    /// Seconds between polls per environment
    #[arg(long, global = true)]
    poll_interval: Option<u64>,

    /// Directory of `<name>.json` secret files; secrets are read from the
    /// environment otherwise
    #[arg(long, global = true, env = "STEPDECK_SECRET_DIR")]
    secret_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Environment settings with command-line overrides applied
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::from_env().context("Invalid STEPDECK_* environment")?;

        if let Some(dir) = &self.config_dir {
            settings.config_dir = dir.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            settings.workflow_endpoint = endpoint.clone();
        }
        if !self.environments.is_empty() {
            settings.environments = self.environments.clone();
        }
        if let Some(seconds) = self.poll_interval {
            settings.poll_interval = Duration::from_secs(seconds);
        }

        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stepdeck=info,stepdeck_engine=info,stepdeck_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;
    let console = Console::new(settings, cli.secret_dir);

    handle_command(cli.command, &console).await
}
