//! Watch command
//!
//! Runs the pollers and prints what changed between published snapshots until
//! Ctrl-C. The definition directory is re-read periodically; pollers pick up the
//! new catalog on their next tick.

use anyhow::{Context, Result};
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use stepdeck_core::domain::snapshot::{ReconciliationSnapshot, SnapshotChange};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use super::paint_status;
use crate::console::Console;

pub async fn watch(
    console: &Console,
    env: Option<String>,
    pipeline: Option<String>,
    reload_every: u64,
) -> Result<()> {
    if let Some(env) = &env {
        console.require_environment(env)?;
    }
    let session = console.session()?;

    let environments: Vec<String> = match env {
        Some(env) => vec![env],
        None => session.engine().environments().map(str::to_string).collect(),
    };

    let mut followers = Vec::new();
    for environment in &environments {
        if let Some(snapshots) = session.engine().subscribe(environment) {
            followers.push(tokio::spawn(follow(snapshots, pipeline.clone())));
        }
    }

    println!(
        "{}",
        format!(
            "Watching {} (every {:?}); Ctrl-C to stop",
            environments.join(", "),
            console.settings().poll_interval
        )
        .bold()
    );

    let mut reload = time::interval(Duration::from_secs(reload_every.max(1)));
    reload.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the catalog was just loaded
    reload.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = reload.tick() => match session.store.reload() {
                Ok(catalog) => {
                    for error in catalog.errors() {
                        warn!("Skipping definition: {}", error);
                    }
                    info!("Reloaded {} pipeline(s)", catalog.len());
                }
                Err(e) => warn!("Keeping previous pipelines: {}", e),
            },
        }
    }

    session.shutdown().await;
    for follower in followers {
        let _ = follower.await;
    }
    Ok(())
}

/// Prints changes of one environment until its poller stops
async fn follow(
    mut snapshots: watch::Receiver<Arc<ReconciliationSnapshot>>,
    pipeline: Option<String>,
) {
    let mut previous = snapshots.borrow_and_update().clone();

    while snapshots.changed().await.is_ok() {
        let current = snapshots.borrow_and_update().clone();

        for change in current.diff(&previous) {
            let key = match &change {
                SnapshotChange::Added { key, .. }
                | SnapshotChange::StatusChanged { key, .. }
                | SnapshotChange::Removed { key } => key,
            };
            let record = current
                .get(&key.execution_id)
                .or_else(|| previous.get(&key.execution_id));
            let Some(record) = record else {
                continue;
            };
            if pipeline.as_deref().is_some_and(|p| p != record.pipeline) {
                continue;
            }

            let prefix = format!("[{}] {} {}", current.environment, record.pipeline, record.name);
            match change {
                SnapshotChange::Added { status, .. } => {
                    println!("{} {}", prefix.bold(), paint_status(status));
                }
                SnapshotChange::StatusChanged { from, to, .. } => {
                    println!(
                        "{} {} → {}",
                        prefix.bold(),
                        paint_status(from),
                        paint_status(to)
                    );
                }
                SnapshotChange::Removed { .. } => {
                    println!("{} {}", prefix.dimmed(), "left the window".dimmed());
                }
            }
        }

        if current.sequence != previous.sequence {
            print_counts(&current, pipeline.as_deref());
        }
        previous = current;
    }
}

fn print_counts(snapshot: &ReconciliationSnapshot, pipeline: Option<&str>) {
    let counts = snapshot.counts_by_status(pipeline);
    let summary = counts
        .iter()
        .map(|(status, count)| format!("{} {}", paint_status(*status), count))
        .collect::<Vec<_>>()
        .join("  ");
    println!(
        "{} {}",
        format!(
            "[{}] poll #{} {}",
            snapshot.environment,
            snapshot.sequence,
            snapshot.taken_at.format("%H:%M:%S")
        )
        .dimmed(),
        if summary.is_empty() {
            "no executions".dimmed().to_string()
        } else {
            summary
        }
    );
}
