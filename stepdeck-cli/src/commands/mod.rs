//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipelines;
mod run;
mod watch;

pub use pipelines::PipelineCommands;
pub use run::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use stepdeck_core::domain::execution::ExecutionStatus;

use crate::console::Console;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Inspect pipeline definitions
    Pipelines {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Start, stop and inspect executions
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Follow executions until interrupted
    Watch {
        /// Only this environment
        #[arg(short, long)]
        env: Option<String>,

        /// Only this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,

        /// Seconds between re-reads of the definition directory
        #[arg(long, default_value = "60")]
        reload_every: u64,
    },
}

pub async fn handle_command(command: Commands, console: &Console) -> Result<()> {
    match command {
        Commands::Pipelines { command } => pipelines::handle_pipeline_command(command, console),
        Commands::Run { command } => run::handle_run_command(command, console).await,
        Commands::Watch {
            env,
            pipeline,
            reload_every,
        } => watch::watch(console, env, pipeline, reload_every).await,
    }
}

/// Status rendered in the color operators expect
pub(crate) fn paint_status(status: ExecutionStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        ExecutionStatus::Succeeded => text.green(),
        ExecutionStatus::Running | ExecutionStatus::Redriven => text.cyan(),
        ExecutionStatus::PendingConfirm => text.blue(),
        ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Aborted => {
            text.red()
        }
        ExecutionStatus::UnconfirmedTimeout | ExecutionStatus::Unknown => text.yellow(),
        ExecutionStatus::Stopped => text.dimmed(),
    }
}
