//! Remote workflow primitives
//!
//! [`WorkflowApi`] is the seam between the console and the remote workflow
//! service. The HTTP transport implements it for real deployments; tests use the
//! in-memory fake. Implementations make exactly one attempt per call: retries,
//! backoff and deadlines belong to [`crate::ExecutionAdapter`].

use async_trait::async_trait;
use stepdeck_core::dto::history::{HistoryPage, StateMachineDefinition};
use stepdeck_core::dto::remote::{ExecutionPage, RemoteExecution, StartRequest, StartedExecution};

use crate::error::Result;

#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// Start an execution. Not idempotent unless the request name is reused.
    async fn start_execution(&self, request: &StartRequest) -> Result<StartedExecution>;

    /// Stop a running execution
    async fn stop_execution(&self, execution_id: &str) -> Result<()>;

    /// Resume a failed execution from its point of failure
    async fn redrive_execution(&self, execution_id: &str) -> Result<()>;

    async fn describe_execution(&self, execution_id: &str) -> Result<RemoteExecution>;

    /// One page of executions for a target, newest first
    async fn list_executions(
        &self,
        target: &str,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<ExecutionPage>;

    /// One page of an execution's history, oldest first
    async fn get_execution_history(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
    ) -> Result<HistoryPage>;

    async fn describe_state_machine(&self, target: &str) -> Result<StateMachineDefinition>;
}
