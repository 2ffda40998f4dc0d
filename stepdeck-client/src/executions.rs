//! Workflow primitives over HTTP

use async_trait::async_trait;
use stepdeck_core::dto::history::{HistoryEvent, HistoryPage, StateMachineDefinition};
use stepdeck_core::dto::remote::{ExecutionPage, RemoteExecution, StartRequest, StartedExecution};

use crate::WorkflowClient;
use crate::api::WorkflowApi;
use crate::error::{RemoteError, Result};
use crate::wire::{
    DescribeStateMachineOutput, ExecutionArnInput, GetExecutionHistoryInput,
    GetExecutionHistoryOutput, ListExecutionsInput, ListExecutionsOutput, StartExecutionInput,
    StartExecutionOutput, StateMachineArnInput, WireExecution, decode_execution,
};

/// Page size used when walking execution history
const HISTORY_PAGE_SIZE: u32 = 100;

#[async_trait]
impl WorkflowApi for WorkflowClient {
    // =============================================================================
    // Execution Lifecycle
    // =============================================================================

    async fn start_execution(&self, request: &StartRequest) -> Result<StartedExecution> {
        let output: StartExecutionOutput = self
            .call(
                "StartExecution",
                &StartExecutionInput {
                    state_machine_arn: &request.target,
                    name: &request.name,
                    input: &request.input,
                },
            )
            .await?;

        Ok(StartedExecution {
            execution_id: output.execution_arn,
            started_at: output.start_date,
        })
    }

    async fn stop_execution(&self, execution_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "StopExecution",
                &ExecutionArnInput {
                    execution_arn: execution_id,
                },
            )
            .await?;
        Ok(())
    }

    async fn redrive_execution(&self, execution_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "RedriveExecution",
                &ExecutionArnInput {
                    execution_arn: execution_id,
                },
            )
            .await?;
        Ok(())
    }

    // =============================================================================
    // Queries
    // =============================================================================

    async fn describe_execution(&self, execution_id: &str) -> Result<RemoteExecution> {
        let wire: WireExecution = self
            .call(
                "DescribeExecution",
                &ExecutionArnInput {
                    execution_arn: execution_id,
                },
            )
            .await?;
        Ok(wire.into())
    }

    async fn list_executions(
        &self,
        target: &str,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<ExecutionPage> {
        let output: ListExecutionsOutput = self
            .call(
                "ListExecutions",
                &ListExecutionsInput {
                    state_machine_arn: target,
                    max_results: page_size,
                    next_token,
                },
            )
            .await?;

        Ok(ExecutionPage {
            items: output.executions.into_iter().map(decode_execution).collect(),
            next_token: output.next_token,
        })
    }

    async fn get_execution_history(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
    ) -> Result<HistoryPage> {
        let output: GetExecutionHistoryOutput = self
            .call(
                "GetExecutionHistory",
                &GetExecutionHistoryInput {
                    execution_arn: execution_id,
                    max_results: HISTORY_PAGE_SIZE,
                    reverse_order: false,
                    next_token,
                },
            )
            .await?;

        Ok(HistoryPage {
            events: output.events.into_iter().map(HistoryEvent::from).collect(),
            next_token: output.next_token,
        })
    }

    async fn describe_state_machine(&self, target: &str) -> Result<StateMachineDefinition> {
        let output: DescribeStateMachineOutput = self
            .call(
                "DescribeStateMachine",
                &StateMachineArnInput {
                    state_machine_arn: target,
                },
            )
            .await?;

        StateMachineDefinition::try_from(output).map_err(|e| {
            RemoteError::Malformed(format!("State machine definition is not valid JSON: {}", e))
        })
    }
}
