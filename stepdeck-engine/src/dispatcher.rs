//! Command Dispatcher
//!
//! Validates operator commands against the current catalog and the engine's
//! view before anything reaches the remote service.

use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use stepdeck_client::artifacts::{ArtifactEntry, ArtifactError, ArtifactStore};
use stepdeck_client::{ExecutionAdapter, RemoteError};
use stepdeck_core::domain::execution::{ExecutionKey, ExecutionRecord, ExecutionStatus, Verdict};
use stepdeck_core::domain::pipeline::PipelineConfig;
use stepdeck_core::dto::history::{HistoryEvent, StateProgress};
use stepdeck_core::dto::remote::{RemoteExecution, StartRequest};
use stepdeck_core::naming;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::ConfigStore;
use crate::engine::{EngineError, ReconciliationEngine};
use crate::validation::{RawParams, ValidationError, validate};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Pipeline {pipeline} is not deployed to {environment}")]
    NotDeployed {
        pipeline: String,
        environment: String,
    },

    #[error("Execution {0} is not tracked")]
    UnknownExecution(ExecutionKey),

    #[error("Cannot {action} {key}: execution is {status}")]
    InvalidState {
        key: ExecutionKey,
        status: ExecutionStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Artifact storage is not configured")]
    ArtifactsUnavailable,

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Entry point for start, stop and redrive
pub struct CommandDispatcher {
    catalog: Arc<ConfigStore>,
    engine: Arc<ReconciliationEngine>,
    adapter: ExecutionAdapter,
    artifacts: Option<ArtifactStore>,
}

impl CommandDispatcher {
    pub fn new(
        catalog: Arc<ConfigStore>,
        engine: Arc<ReconciliationEngine>,
        adapter: ExecutionAdapter,
    ) -> Self {
        Self {
            catalog,
            engine,
            adapter,
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    fn pipeline(&self, name: &str) -> Result<Arc<PipelineConfig>, DispatchError> {
        self.catalog
            .current()
            .pipeline(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownPipeline(name.to_string()))
    }

    fn tracked(&self, key: &ExecutionKey) -> Result<ExecutionRecord, DispatchError> {
        self.engine
            .record(key)
            .ok_or_else(|| DispatchError::UnknownExecution(key.clone()))
    }

    /// Launches a pipeline and tracks it as `PENDING_CONFIRM`
    ///
    /// `label` names the execution; the pipeline name is used when absent.
    pub async fn start(
        &self,
        pipeline: &str,
        environment: &str,
        raw: &RawParams,
        label: Option<&str>,
    ) -> Result<ExecutionRecord, DispatchError> {
        let config = self.pipeline(pipeline)?;
        let target = config
            .target_for(environment)
            .ok_or_else(|| DispatchError::NotDeployed {
                pipeline: pipeline.to_string(),
                environment: environment.to_string(),
            })?
            .to_string();
        let params = validate(&config, raw)?;

        let name = naming::execution_name(label.unwrap_or(&config.name), Utc::now());
        let started = self
            .adapter
            .start_execution(&StartRequest {
                target,
                name: name.clone(),
                input: params.to_input_json(),
            })
            .await?;

        let execution_id = started.execution_id.unwrap_or_else(naming::local_token);
        info!(
            "[{}] Started {} as {} ({})",
            environment, pipeline, name, execution_id
        );

        let record = ExecutionRecord::speculative(
            ExecutionKey::new(environment, execution_id),
            &config.name,
            name,
            params.into_map(),
        );
        Ok(self.engine.track(record).await?)
    }

    /// Requests a stop; the status moves once the remote confirms it
    pub async fn stop(&self, key: &ExecutionKey) -> Result<ExecutionRecord, DispatchError> {
        let record = self.tracked(key)?;
        if record.status != ExecutionStatus::Running {
            return Err(DispatchError::InvalidState {
                key: key.clone(),
                status: record.status,
                action: "stop",
            });
        }

        self.adapter.stop_execution(&key.execution_id).await?;
        info!("Stop requested for {}", key);

        Ok(self.engine.note_stop(key).await?.unwrap_or(record))
    }

    /// Resumes a failed execution from its point of failure
    pub async fn redrive(&self, key: &ExecutionKey) -> Result<ExecutionRecord, DispatchError> {
        let record = self.tracked(key)?;
        if record.judge(ExecutionStatus::Redriven, None) != Verdict::Redrive {
            return Err(DispatchError::InvalidState {
                key: key.clone(),
                status: record.status,
                action: "redrive",
            });
        }

        self.adapter.redrive_execution(&key.execution_id).await?;
        info!("Redrive requested for {}", key);

        match self.engine.note_redrive(key).await? {
            Ok(updated) => Ok(updated),
            Err(status) => {
                // A poll merged the redrive before the intent arrived
                warn!(
                    "Redrive of {} accepted remotely while the local view moved to {:?}",
                    key, status
                );
                Ok(self.engine.record(key).unwrap_or(record))
            }
        }
    }

    /// Fresh remote details, including input and failure cause
    pub async fn describe(&self, key: &ExecutionKey) -> Result<RemoteExecution, DispatchError> {
        Ok(self.adapter.describe_execution(&key.execution_id).await?)
    }

    pub async fn history(&self, key: &ExecutionKey) -> Result<Vec<HistoryEvent>, DispatchError> {
        Ok(self.adapter.execution_history(&key.execution_id).await?)
    }

    /// Progress of every state of the execution's state machine
    pub async fn progress(
        &self,
        key: &ExecutionKey,
    ) -> Result<BTreeMap<String, StateProgress>, DispatchError> {
        let execution = self.describe(key).await?;
        Ok(self
            .adapter
            .state_progress(&execution.target, &key.execution_id)
            .await?)
    }

    /// Artifacts written by an execution, newest first
    pub async fn artifacts(
        &self,
        pipeline: &str,
        execution_id: &str,
    ) -> Result<Vec<ArtifactEntry>, DispatchError> {
        let store = self
            .artifacts
            .as_ref()
            .ok_or(DispatchError::ArtifactsUnavailable)?;
        let config = self.pipeline(pipeline)?;
        Ok(store.list(&config.artifact_prefix(execution_id)).await?)
    }

    pub async fn artifact(&self, key: &str) -> Result<Bytes, DispatchError> {
        let store = self
            .artifacts
            .as_ref()
            .ok_or(DispatchError::ArtifactsUnavailable)?;
        Ok(store.get(key).await?)
    }
}
