//! Reconciliation Engine
//!
//! One poller task per environment. Readers get the latest published
//! [`ReconciliationSnapshot`] without waiting on any poll in progress.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use stepdeck_client::ExecutionAdapter;
use stepdeck_core::domain::execution::{ExecutionKey, ExecutionRecord, ExecutionStatus};
use stepdeck_core::domain::snapshot::ReconciliationSnapshot;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::reconciler::Reconciler;
use crate::scheduler::{EnvironmentPoller, Intent, PollerSettings};
use crate::settings::Settings;

/// Queued local commands per environment
const INTENT_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("Poller for {0} is not running")]
    Stopped(String),
}

struct EnvironmentHandle {
    snapshots: watch::Receiver<Arc<ReconciliationSnapshot>>,
    intents: mpsc::Sender<Intent>,
}

/// Running pollers and their published snapshots
pub struct ReconciliationEngine {
    environments: BTreeMap<String, EnvironmentHandle>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReconciliationEngine {
    /// Spawns a poller for every configured environment
    pub fn start(
        settings: &Settings,
        catalog: watch::Receiver<Arc<Catalog>>,
        adapter: ExecutionAdapter,
    ) -> Self {
        let cancel = CancellationToken::new();
        let poller_settings = PollerSettings {
            interval: settings.poll_interval,
            jitter: settings.poll_jitter,
            page_size: settings.list_page_size,
            max_pages: settings.list_max_pages,
        };

        let mut environments = BTreeMap::new();
        let mut tasks = Vec::new();

        for environment in &settings.environments {
            let (publisher, snapshots) =
                watch::channel(Arc::new(ReconciliationSnapshot::empty(environment)));
            let (intents, intents_rx) = mpsc::channel(INTENT_BUFFER);

            let poller = EnvironmentPoller::new(
                Reconciler::new(environment, settings.confirm_ticks, settings.max_records),
                adapter.clone(),
                catalog.clone(),
                intents_rx,
                publisher,
                poller_settings,
                cancel.child_token(),
            );
            tasks.push(tokio::spawn(poller.run()));
            environments.insert(
                environment.clone(),
                EnvironmentHandle {
                    snapshots,
                    intents,
                },
            );
        }

        info!(
            "Reconciliation engine started for {} environments",
            environments.len()
        );

        Self {
            environments,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.environments.keys().map(String::as_str)
    }

    /// Latest published snapshot of an environment
    pub fn snapshot(&self, environment: &str) -> Option<Arc<ReconciliationSnapshot>> {
        self.environments
            .get(environment)
            .map(|handle| handle.snapshots.borrow().clone())
    }

    /// Notified on every publication of an environment's snapshot
    pub fn subscribe(
        &self,
        environment: &str,
    ) -> Option<watch::Receiver<Arc<ReconciliationSnapshot>>> {
        self.environments
            .get(environment)
            .map(|handle| handle.snapshots.clone())
    }

    /// Waits until an environment has merged its first poll
    pub async fn first_poll(
        &self,
        environment: &str,
    ) -> Result<Arc<ReconciliationSnapshot>, EngineError> {
        let mut snapshots = self
            .subscribe(environment)
            .ok_or_else(|| EngineError::UnknownEnvironment(environment.to_string()))?;
        let snapshot = snapshots
            .wait_for(|snapshot| snapshot.sequence > 0)
            .await
            .map_err(|_| EngineError::Stopped(environment.to_string()))?;
        Ok(snapshot.clone())
    }

    /// Current view of one execution
    pub fn record(&self, key: &ExecutionKey) -> Option<ExecutionRecord> {
        self.snapshot(&key.environment)?
            .get(&key.execution_id)
            .cloned()
    }

    pub(crate) async fn track(&self, record: ExecutionRecord) -> Result<ExecutionRecord, EngineError> {
        let environment = record.key.environment.clone();
        self.send(&environment, |ack| Intent::Track { record, ack })
            .await
    }

    pub(crate) async fn note_stop(
        &self,
        key: &ExecutionKey,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        let execution_id = key.execution_id.clone();
        self.send(&key.environment, |ack| Intent::StopRequested {
            execution_id,
            at: Utc::now(),
            ack,
        })
        .await
    }

    pub(crate) async fn note_redrive(
        &self,
        key: &ExecutionKey,
    ) -> Result<Result<ExecutionRecord, Option<ExecutionStatus>>, EngineError> {
        let execution_id = key.execution_id.clone();
        self.send(&key.environment, |ack| Intent::Redriven { execution_id, ack })
            .await
    }

    async fn send<T>(
        &self,
        environment: &str,
        intent: impl FnOnce(oneshot::Sender<T>) -> Intent,
    ) -> Result<T, EngineError> {
        let handle = self
            .environments
            .get(environment)
            .ok_or_else(|| EngineError::UnknownEnvironment(environment.to_string()))?;

        let (ack, acked) = oneshot::channel();
        handle
            .intents
            .send(intent(ack))
            .await
            .map_err(|_| EngineError::Stopped(environment.to_string()))?;
        acked
            .await
            .map_err(|_| EngineError::Stopped(environment.to_string()))
    }

    /// Stops every poller and waits for them to exit
    ///
    /// Polls in flight are abandoned; their results are never merged.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Poller task ended abnormally: {}", e);
            }
        }
        info!("Reconciliation engine stopped");
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stepdeck_client::RetryPolicy;
    use stepdeck_client::testing::InMemoryWorkflow;

    fn engine() -> ReconciliationEngine {
        let mut settings = Settings::default();
        settings.environments = vec!["staging".to_string(), "production".to_string()];
        settings.poll_jitter = Duration::ZERO;
        let adapter = ExecutionAdapter::new(
            Arc::new(InMemoryWorkflow::new()),
            RetryPolicy::default(),
        );
        let (_tx, catalog) = watch::channel(Arc::new(Catalog::empty()));
        ReconciliationEngine::start(&settings, catalog, adapter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_spawns_one_poller_per_environment() {
        let engine = engine();
        let environments: Vec<_> = engine.environments().collect();
        assert_eq!(environments, vec!["production", "staging"]);

        let snapshot = engine.snapshot("staging").unwrap();
        assert_eq!(snapshot.environment, "staging");
        assert!(engine.snapshot("development").is_none());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_unknown_environment() {
        let engine = engine();
        let record = ExecutionRecord::speculative(
            ExecutionKey::new("development", "local-1"),
            "reviews",
            "run",
            BTreeMap::new(),
        );
        let result = engine.track(record).await;
        assert!(matches!(result, Err(EngineError::UnknownEnvironment(_))));
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_intents_after_shutdown_fail() {
        let engine = engine();
        engine.shutdown().await;

        let key = ExecutionKey::new("staging", "local-1");
        let result = engine.note_stop(&key).await;
        assert!(matches!(result, Err(EngineError::Stopped(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_waits_for_a_merge() {
        let engine = engine();
        let snapshot = engine.first_poll("staging").await.unwrap();
        assert_eq!(snapshot.sequence, 1);

        let unknown = engine.first_poll("development").await;
        assert!(matches!(unknown, Err(EngineError::UnknownEnvironment(_))));
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_record_is_visible_to_readers() {
        let engine = engine();
        let key = ExecutionKey::new("staging", "local-1");
        let record = ExecutionRecord::speculative(key.clone(), "reviews", "run", BTreeMap::new());

        let tracked = engine.track(record).await.unwrap();
        assert_eq!(tracked.status, ExecutionStatus::PendingConfirm);
        assert_eq!(
            engine.record(&key).map(|r| r.status),
            Some(ExecutionStatus::PendingConfirm)
        );
        engine.shutdown().await;
    }
}
