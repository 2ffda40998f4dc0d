//! Execution Client Adapter
//!
//! Wraps a [`WorkflowApi`] with the retry policy. `Throttled` and `Transient`
//! failures are retried with jittered exponential backoff; every other kind
//! propagates on first sight. Each call, retries included, is bounded by the
//! policy deadline. Starts are never retried.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use stepdeck_core::dto::history::{HistoryEvent, StateMachineDefinition, StateProgress, state_progress};
use stepdeck_core::dto::remote::{
    ExecutionPage, MalformedRecord, RemoteExecution, StartRequest, StartedExecution,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::WorkflowApi;
use crate::error::{RemoteError, Result};
use crate::retry::RetryPolicy;

/// Pages of a listing gathered before a cutoff
#[derive(Debug, Default)]
pub struct RecentExecutions {
    pub items: Vec<std::result::Result<RemoteExecution, MalformedRecord>>,
    /// False when the cutoff fell before the last page
    pub complete: bool,
}

/// Upper bound on history pages walked for one execution
const MAX_HISTORY_PAGES: usize = 50;

/// Shared, read-only handle to the remote workflow service
#[derive(Clone)]
pub struct ExecutionAdapter {
    api: Arc<dyn WorkflowApi>,
    policy: RetryPolicy,
}

impl ExecutionAdapter {
    pub fn new(api: Arc<dyn WorkflowApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `call` under `policy`, retrying only retryable failures
    async fn with_retry<T, F, Fut>(&self, operation: &str, policy: RetryPolicy, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match call().await {
                    Ok(value) => {
                        if attempt > 1 {
                            debug!("{} succeeded after {} attempts", operation, attempt);
                        }
                        return Ok(value);
                    }
                    Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                        let delay = policy.backoff(attempt);
                        warn!(
                            "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                            operation, attempt, policy.max_attempts, e, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(policy.deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::deadline_exceeded(operation, policy.deadline)),
        }
    }

    // =============================================================================
    // Commands
    // =============================================================================

    /// Start an execution with a single attempt
    ///
    /// A failed start may still have launched remotely; retrying is the caller's
    /// decision and must reuse the same execution name.
    pub async fn start_execution(&self, request: &StartRequest) -> Result<StartedExecution> {
        let policy = RetryPolicy::no_retry(self.policy.deadline);
        self.with_retry("StartExecution", policy, || self.api.start_execution(request))
            .await
    }

    pub async fn stop_execution(&self, execution_id: &str) -> Result<()> {
        self.with_retry("StopExecution", self.policy, || {
            self.api.stop_execution(execution_id)
        })
        .await
    }

    pub async fn redrive_execution(&self, execution_id: &str) -> Result<()> {
        self.with_retry("RedriveExecution", self.policy, || {
            self.api.redrive_execution(execution_id)
        })
        .await
    }

    // =============================================================================
    // Queries
    // =============================================================================

    pub async fn describe_execution(&self, execution_id: &str) -> Result<RemoteExecution> {
        self.with_retry("DescribeExecution", self.policy, || {
            self.api.describe_execution(execution_id)
        })
        .await
    }

    pub async fn list_executions(
        &self,
        target: &str,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<ExecutionPage> {
        self.with_retry("ListExecutions", self.policy, || {
            self.api.list_executions(target, page_size, next_token)
        })
        .await
    }

    /// Most recent executions of a target, walking at most `max_pages` pages
    pub async fn list_recent(
        &self,
        target: &str,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Vec<std::result::Result<RemoteExecution, MalformedRecord>>> {
        let recent = self.walk_pages(target, page_size, max_pages, None).await?;
        Ok(recent.items)
    }

    /// Like [`list_recent`](Self::list_recent), but no page call outlives `cutoff`
    ///
    /// Pages that arrived before the cutoff are kept and the listing is marked
    /// incomplete. Fails when not even the first page made it.
    pub async fn list_recent_until(
        &self,
        target: &str,
        page_size: u32,
        max_pages: u32,
        cutoff: Instant,
    ) -> Result<RecentExecutions> {
        self.walk_pages(target, page_size, max_pages, Some(cutoff))
            .await
    }

    async fn walk_pages(
        &self,
        target: &str,
        page_size: u32,
        max_pages: u32,
        cutoff: Option<Instant>,
    ) -> Result<RecentExecutions> {
        let mut recent = RecentExecutions::default();
        let mut next_token: Option<String> = None;

        for page_number in 0..max_pages.max(1) {
            let page = match cutoff {
                None => Some(
                    self.list_executions(target, page_size, next_token.as_deref())
                        .await?,
                ),
                Some(cutoff) if Instant::now() < cutoff => tokio::time::timeout_at(
                    cutoff,
                    self.list_executions(target, page_size, next_token.as_deref()),
                )
                .await
                .ok()
                .transpose()?,
                Some(_) => None,
            };

            let Some(page) = page else {
                if page_number == 0 {
                    return Err(RemoteError::Transient(format!(
                        "ListExecutions of {} cut off before its first page",
                        target
                    )));
                }
                debug!("Listing of {} cut off after {} page(s)", target, page_number);
                return Ok(recent);
            };

            recent.items.extend(page.items);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        recent.complete = true;
        Ok(recent)
    }

    /// Full history of an execution, oldest first
    pub async fn execution_history(&self, execution_id: &str) -> Result<Vec<HistoryEvent>> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_HISTORY_PAGES {
            let token = next_token.take();
            let page = self
                .with_retry("GetExecutionHistory", self.policy, || {
                    self.api.get_execution_history(execution_id, token.as_deref())
                })
                .await?;
            events.extend(page.events);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(events),
            }
        }

        warn!(
            "History of {} exceeds {} pages; showing a partial view",
            execution_id, MAX_HISTORY_PAGES
        );
        Ok(events)
    }

    pub async fn describe_state_machine(&self, target: &str) -> Result<StateMachineDefinition> {
        self.with_retry("DescribeStateMachine", self.policy, || {
            self.api.describe_state_machine(target)
        })
        .await
    }

    /// Progress of every state of the target's definition within an execution
    pub async fn state_progress(
        &self,
        target: &str,
        execution_id: &str,
    ) -> Result<BTreeMap<String, StateProgress>> {
        let definition = self.describe_state_machine(target).await?;
        let events = self.execution_history(execution_id).await?;
        Ok(state_progress(&definition.state_names(), &events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use crate::testing::{InMemoryWorkflow, Operation, remote_execution};
    use std::time::Duration;

    const TARGET: &str = "arn:aws:states:eu-west-1:123456789012:stateMachine:reviews";

    fn adapter(workflow: Arc<InMemoryWorkflow>) -> ExecutionAdapter {
        ExecutionAdapter::new(
            workflow,
            RetryPolicy::new(
                3,
                Duration::from_millis(100),
                Duration::from_millis(400),
                Duration::from_secs(5),
            ),
        )
    }

    fn seeded() -> (Arc<InMemoryWorkflow>, String) {
        let workflow = Arc::new(InMemoryWorkflow::new());
        let execution = remote_execution(TARGET, "run", "RUNNING");
        let id = execution.execution_id.clone();
        workflow.insert(execution);
        (workflow, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_throttled_calls() {
        let (workflow, id) = seeded();
        workflow.fail_next(Operation::Describe, RemoteErrorKind::Throttled, 2);

        let execution = adapter(workflow.clone()).describe_execution(&id).await.unwrap();

        assert_eq!(execution.execution_id, id);
        assert_eq!(workflow.calls(Operation::Describe), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (workflow, id) = seeded();
        workflow.fail_next(Operation::Stop, RemoteErrorKind::Transient, 10);

        let err = adapter(workflow.clone()).stop_execution(&id).await.unwrap_err();

        assert_eq!(err.kind(), RemoteErrorKind::Transient);
        assert_eq!(workflow.calls(Operation::Stop), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_propagate_immediately() {
        let workflow = Arc::new(InMemoryWorkflow::new());

        let err = adapter(workflow.clone())
            .describe_execution("arn:missing")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), RemoteErrorKind::NotFound);
        assert_eq!(workflow.calls(Operation::Describe), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_never_retried() {
        let workflow = Arc::new(InMemoryWorkflow::new());
        workflow.fail_next(Operation::Start, RemoteErrorKind::Transient, 1);

        let err = adapter(workflow.clone())
            .start_execution(&StartRequest {
                target: TARGET.to_string(),
                name: "run".to_string(),
                input: "{}".to_string(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), RemoteErrorKind::Transient);
        assert_eq!(workflow.calls(Operation::Start), 1);
        assert!(workflow.executions_for(TARGET).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_slow_calls() {
        let (workflow, id) = seeded();
        workflow.set_latency(Duration::from_secs(60));

        let err = adapter(workflow.clone()).describe_execution(&id).await.unwrap_err();

        assert_eq!(err.kind(), RemoteErrorKind::Transient);
        assert!(err.to_string().contains("DescribeExecution"));
    }

    #[tokio::test]
    async fn test_list_recent_walks_pages() {
        let workflow = Arc::new(InMemoryWorkflow::new());
        for i in 0..7 {
            workflow.insert(remote_execution(TARGET, &format!("run_{}", i), "SUCCEEDED"));
        }
        let adapter = adapter(workflow.clone());

        let all = adapter.list_recent(TARGET, 3, 5).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(workflow.calls(Operation::List), 3);

        let capped = adapter.list_recent(TARGET, 3, 2).await.unwrap();
        assert_eq!(capped.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_recent_until_keeps_pages_before_cutoff() {
        let workflow = Arc::new(InMemoryWorkflow::new());
        for i in 0..7 {
            workflow.insert(remote_execution(TARGET, &format!("run_{}", i), "SUCCEEDED"));
        }
        workflow.set_latency(Duration::from_secs(4));
        let adapter = adapter(workflow.clone());

        // Pages answer at 4s and 8s; the third would land after the cutoff
        let cutoff = Instant::now() + Duration::from_secs(10);
        let recent = adapter.list_recent_until(TARGET, 3, 5, cutoff).await.unwrap();
        assert_eq!(recent.items.len(), 6);
        assert!(!recent.complete);

        // Nothing is issued once the cutoff has passed
        let calls = workflow.calls(Operation::List);
        let err = adapter
            .list_recent_until(TARGET, 3, 5, Instant::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::Transient);
        assert_eq!(workflow.calls(Operation::List), calls);

        let roomy = Instant::now() + Duration::from_secs(60);
        let recent = adapter.list_recent_until(TARGET, 3, 5, roomy).await.unwrap();
        assert_eq!(recent.items.len(), 7);
        assert!(recent.complete);
    }

    #[tokio::test]
    async fn test_state_progress() {
        let (workflow, id) = seeded();
        workflow.set_definition(StateMachineDefinition {
            target: TARGET.to_string(),
            name: "reviews".to_string(),
            definition: serde_json::json!({
                "States": { "Fetch": {}, "Review": {}, "Publish": {} }
            }),
        });
        for (event_id, event_type, state) in [
            (1, "TaskStateEntered", "Fetch"),
            (2, "TaskStateExited", "Fetch"),
            (3, "TaskStateEntered", "Review"),
        ] {
            workflow.push_history(
                &id,
                HistoryEvent {
                    id: event_id,
                    timestamp: None,
                    event_type: event_type.to_string(),
                    state_name: Some(state.to_string()),
                },
            );
        }

        let progress = adapter(workflow).state_progress(TARGET, &id).await.unwrap();

        assert_eq!(progress["Fetch"], StateProgress::Completed);
        assert_eq!(progress["Review"], StateProgress::Running);
        assert_eq!(progress["Publish"], StateProgress::NotStarted);
    }
}
