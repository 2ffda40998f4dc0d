//! Execution command handlers
//!
//! Commands that act on a single execution. Stop and redrive wait for the
//! environment's first poll so they are judged against a fresh view.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use stepdeck_core::domain::execution::{ExecutionKey, ExecutionRecord, ExecutionStatus};
use stepdeck_core::dto::history::StateProgress;
use stepdeck_core::format::{console_url, format_duration};
use stepdeck_engine::RawParams;

use super::paint_status;
use crate::console::{Console, Session};

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Launch a pipeline
    Start {
        /// Pipeline name
        pipeline: String,

        /// Environment to launch in
        env: String,

        /// Parameters as key=value pairs (e.g., product_ids=42,17)
        #[arg(short, long, value_parser = parse_key_val)]
        param: Vec<(String, String)>,

        /// Execution label; the pipeline name is used otherwise
        #[arg(short, long)]
        label: Option<String>,

        /// Wait until the workflow service confirms the execution
        #[arg(short, long)]
        wait: bool,
    },
    /// Stop a running execution
    Stop {
        env: String,
        /// Execution identifier (ARN)
        execution: String,
    },
    /// Resume a failed execution from its point of failure
    Redrive {
        env: String,
        /// Execution identifier (ARN)
        execution: String,
    },
    /// Show an execution's details, state progress and history
    History {
        env: String,
        /// Execution identifier (ARN)
        execution: String,
    },
    /// List or download an execution's artifacts
    Artifacts {
        /// Pipeline name
        pipeline: String,
        /// Execution identifier (ARN)
        execution: String,

        /// Download this artifact key instead of listing
        #[arg(long)]
        get: Option<String>,

        /// Where to write the downloaded artifact
        #[arg(short, long, requires = "get")]
        output: Option<PathBuf>,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

pub async fn handle_run_command(command: RunCommands, console: &Console) -> Result<()> {
    let session = console.session()?;

    let result = match command {
        RunCommands::Start {
            pipeline,
            env,
            param,
            label,
            wait,
        } => {
            console.require_environment(&env)?;
            start(&session, &pipeline, &env, param, label.as_deref(), wait).await
        }
        RunCommands::Stop { env, execution } => {
            console.require_environment(&env)?;
            stop(&session, ExecutionKey::new(env, execution)).await
        }
        RunCommands::Redrive { env, execution } => {
            console.require_environment(&env)?;
            redrive(&session, ExecutionKey::new(env, execution)).await
        }
        RunCommands::History { env, execution } => {
            history(&session, ExecutionKey::new(env, execution)).await
        }
        RunCommands::Artifacts {
            pipeline,
            execution,
            get,
            output,
        } => artifacts(&session, &pipeline, &execution, get, output).await,
    };

    session.shutdown().await;
    result
}

async fn start(
    session: &Session,
    pipeline: &str,
    environment: &str,
    params: Vec<(String, String)>,
    label: Option<&str>,
    wait: bool,
) -> Result<()> {
    let raw: RawParams = params
        .into_iter()
        .map(|(k, v)| (k, JsonValue::String(v)))
        .collect();

    let record = session
        .dispatcher
        .start(pipeline, environment, &raw, label)
        .await?;

    println!("{}", "✓ Execution started".green().bold());
    print_record(&record);

    if wait {
        let confirmed = wait_for_confirmation(session, &record).await?;
        println!();
        println!("{}", "Confirmed by the workflow service:".bold());
        print_record(&confirmed);
    }
    Ok(())
}

/// Follows snapshots until the record is no longer speculative
///
/// A start keyed by a local token is re-keyed on confirmation, so the record is
/// matched by pipeline and execution name as well.
async fn wait_for_confirmation(
    session: &Session,
    started: &ExecutionRecord,
) -> Result<ExecutionRecord> {
    let mut snapshots = session
        .engine()
        .subscribe(&started.key.environment)
        .context("Environment is not polled")?;

    loop {
        {
            let snapshot = snapshots.borrow_and_update();
            let confirmed = snapshot.records.values().find(|r| {
                !r.is_speculative()
                    && (r.key == started.key
                        || (r.pipeline == started.pipeline && r.name == started.name))
            });
            if let Some(record) = confirmed {
                return Ok(record.clone());
            }
        }
        snapshots
            .changed()
            .await
            .context("Engine stopped before the execution was confirmed")?;
    }
}

async fn stop(session: &Session, key: ExecutionKey) -> Result<()> {
    session.engine().first_poll(&key.environment).await?;
    let record = session.dispatcher.stop(&key).await?;

    println!("{}", "✓ Stop requested".green().bold());
    print_record(&record);
    Ok(())
}

async fn redrive(session: &Session, key: ExecutionKey) -> Result<()> {
    session.engine().first_poll(&key.environment).await?;
    let record = session.dispatcher.redrive(&key).await?;

    println!("{}", "✓ Redrive requested".green().bold());
    print_record(&record);
    Ok(())
}

async fn history(session: &Session, key: ExecutionKey) -> Result<()> {
    let execution = session.dispatcher.describe(&key).await?;
    let progress = session.dispatcher.progress(&key).await?;
    let events = session.dispatcher.history(&key).await?;

    println!("{}", "Execution Details:".bold());
    println!("  Name:     {}", execution.name.bold());
    println!("  ID:       {}", execution.execution_id.cyan());
    println!("  Status:   {}", paint_status(execution.status()));
    println!(
        "  Duration: {}",
        format_duration(execution.started_at, execution.stopped_at)
    );
    if let Some(summary) = execution.error_summary() {
        println!("  Error:    {}", summary.red());
    }
    if let Some(url) = console_url(&execution.execution_id) {
        println!("  Console:  {}", url.dimmed());
    }

    println!("\n{}", "States:".bold());
    for (state, progress) in &progress {
        let marker = match progress {
            StateProgress::Completed => "●".green(),
            StateProgress::Running => "◐".cyan(),
            StateProgress::NotStarted => "○".dimmed(),
        };
        println!("  {} {}", marker, state);
    }

    println!("\n{}", format!("History ({} events):", events.len()).bold());
    for event in &events {
        let timestamp = event
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {:>4} {} {} {}",
            event.id,
            timestamp.dimmed(),
            event.event_type,
            event.state_name.as_deref().unwrap_or("").cyan()
        );
    }
    Ok(())
}

async fn artifacts(
    session: &Session,
    pipeline: &str,
    execution_id: &str,
    get: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    if let Some(key) = get {
        let bytes = session.dispatcher.artifact(&key).await?;
        match output {
            Some(path) => {
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!(
                    "{}",
                    format!("✓ Wrote {} bytes to {}", bytes.len(), path.display()).green()
                );
            }
            None => println!("{}", String::from_utf8_lossy(&bytes)),
        }
        return Ok(());
    }

    let entries = session.dispatcher.artifacts(pipeline, execution_id).await?;
    if entries.is_empty() {
        println!("{}", "No artifacts found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} artifact(s):", entries.len()).bold());
    for entry in entries {
        println!(
            "  {} {:>10} {}",
            entry
                .last_modified
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed(),
            entry.size,
            entry.key
        );
    }
    Ok(())
}

fn print_record(record: &ExecutionRecord) {
    println!("  Pipeline: {}", record.pipeline.bold());
    println!("  Name:     {}", record.name);
    println!("  ID:       {}", record.key.execution_id.cyan());
    println!("  Status:   {}", paint_status(record.status));
    if record.status != ExecutionStatus::PendingConfirm {
        println!(
            "  Duration: {}",
            format_duration(record.started_at, record.stopped_at)
        );
    }
    if record.stop_requested_at.is_some() {
        println!("  {}", "Stop requested; waiting for the workflow service".yellow());
    }
    if let Some(summary) = &record.error_summary {
        println!("  Error:    {}", summary.red());
    }
}
