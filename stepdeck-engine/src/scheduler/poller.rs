use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::{self, join_all};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use stepdeck_client::ExecutionAdapter;
use stepdeck_core::domain::execution::{ExecutionRecord, ExecutionStatus};
use stepdeck_core::domain::snapshot::ReconciliationSnapshot;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::reconciler::{FetchPlan, Observations, Reconciler, TargetListing};

/// Describe calls in flight at once during a poll cycle
const DESCRIBE_CONCURRENCY: usize = 8;

/// A local command the poller folds into its partition between merges
#[derive(Debug)]
pub enum Intent {
    /// A start was accepted; track its speculative record
    Track {
        record: ExecutionRecord,
        ack: oneshot::Sender<ExecutionRecord>,
    },
    /// A stop was accepted by the remote
    StopRequested {
        execution_id: String,
        at: DateTime<Utc>,
        ack: oneshot::Sender<Option<ExecutionRecord>>,
    },
    /// A redrive was accepted by the remote
    Redriven {
        execution_id: String,
        ack: oneshot::Sender<Result<ExecutionRecord, Option<ExecutionStatus>>>,
    },
}

/// Timing and paging of one environment's poll loop
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub interval: Duration,
    pub jitter: Duration,
    pub page_size: u32,
    pub max_pages: u32,
}

/// Polls one environment and publishes its snapshots
///
/// The poller is the only writer of its [`Reconciler`]. Local commands reach it
/// as [`Intent`]s, which are applied as soon as they arrive, even while a fetch
/// is in flight.
pub struct EnvironmentPoller {
    reconciler: Reconciler,
    adapter: ExecutionAdapter,
    catalog: watch::Receiver<Arc<Catalog>>,
    intents: mpsc::Receiver<Intent>,
    publisher: watch::Sender<Arc<ReconciliationSnapshot>>,
    settings: PollerSettings,
    cancel: CancellationToken,
}

impl EnvironmentPoller {
    pub fn new(
        reconciler: Reconciler,
        adapter: ExecutionAdapter,
        catalog: watch::Receiver<Arc<Catalog>>,
        intents: mpsc::Receiver<Intent>,
        publisher: watch::Sender<Arc<ReconciliationSnapshot>>,
        settings: PollerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            adapter,
            catalog,
            intents,
            publisher,
            settings,
            cancel,
        }
    }

    /// Runs until cancelled
    pub async fn run(mut self) {
        info!(
            "[{}] Poller started (interval: {:?})",
            self.reconciler.environment(),
            self.settings.interval
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(intent) = self.intents.recv() => self.apply(intent),

                _ = ticker.tick() => {
                    if !self.poll_cycle().await {
                        break;
                    }
                }
            }
        }

        info!("[{}] Poller stopped", self.reconciler.environment());
    }

    /// One fetch and merge. Returns false when cancelled mid-cycle.
    ///
    /// No remote call outlives the interval; whatever arrived by then is merged.
    async fn poll_cycle(&mut self) -> bool {
        let environment = self.reconciler.environment().to_string();
        let targets = self.catalog.borrow().targets_for(&environment);
        let plan = self.reconciler.plan(targets);
        let cutoff = Instant::now() + self.settings.interval;

        let fetch = fetch_observations(self.adapter.clone(), plan, self.settings, cutoff);
        tokio::pin!(fetch);

        let observations = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("[{}] Discarding in-flight poll", environment);
                    return false;
                }

                Some(intent) = self.intents.recv() => self.apply(intent),

                observations = &mut fetch => break observations,
            }
        };

        let partial = observations
            .listings
            .iter()
            .filter(|l| l.items.is_ok() && !l.complete)
            .count();
        if partial > 0 {
            warn!(
                "[{}] {} listing(s) cut short by the {:?} poll deadline",
                environment, partial, self.settings.interval
            );
        }

        let report = self.reconciler.merge(observations);
        debug!("[{}] Merged poll {:?}", environment, report);
        if report.failed_calls > 0 {
            warn!(
                "[{}] Poll {} finished with {} failed calls",
                environment, report.sequence, report.failed_calls
            );
        }
        self.publish();
        true
    }

    fn apply(&mut self, intent: Intent) {
        match intent {
            Intent::Track { record, ack } => {
                let tracked = self.reconciler.track(record);
                self.publish();
                let _ = ack.send(tracked);
            }
            Intent::StopRequested {
                execution_id,
                at,
                ack,
            } => {
                let updated = self.reconciler.request_stop(&execution_id, at);
                self.publish();
                let _ = ack.send(updated);
            }
            Intent::Redriven { execution_id, ack } => {
                let outcome = self.reconciler.redrive(&execution_id);
                self.publish();
                let _ = ack.send(outcome);
            }
        }
    }

    fn publish(&self) {
        self.publisher
            .send_replace(Arc::new(self.reconciler.snapshot()));
    }
}

/// Lists every target, then describes what the listing left open
///
/// Calls still running at `cutoff` are abandoned and none start after it.
async fn fetch_observations(
    adapter: ExecutionAdapter,
    plan: FetchPlan,
    settings: PollerSettings,
    cutoff: Instant,
) -> Observations {
    let jitter = jitter_delay(settings.jitter);
    if !jitter.is_zero() {
        time::sleep(jitter).await;
    }

    let listings: Vec<TargetListing> = join_all(plan.targets.iter().map(|(pipeline, target)| {
        let adapter = &adapter;
        async move {
            let listed = adapter
                .list_recent_until(target, settings.page_size, settings.max_pages, cutoff)
                .await;
            let complete = listed.as_ref().is_ok_and(|recent| recent.complete);
            TargetListing {
                pipeline: pipeline.clone(),
                target: target.clone(),
                items: listed.map(|recent| recent.items),
                complete,
            }
        }
    }))
    .await;

    let candidates = plan.describe_candidates(&listings);
    let described: Vec<_> = futures::stream::iter(candidates)
        .map(|execution_id| {
            let adapter = &adapter;
            async move {
                if Instant::now() >= cutoff {
                    debug!("Skipping describe of {}: poll deadline passed", execution_id);
                    return None;
                }
                match time::timeout_at(cutoff, adapter.describe_execution(&execution_id)).await {
                    Ok(result) => Some((execution_id, result)),
                    Err(_) => {
                        debug!("Describe of {} cut off by the poll deadline", execution_id);
                        None
                    }
                }
            }
        })
        .buffer_unordered(DESCRIBE_CONCURRENCY)
        .filter_map(future::ready)
        .collect()
        .await;

    Observations {
        listings,
        described,
    }
}

fn jitter_delay(max: Duration) -> Duration {
    let millis = max.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}
