//! In-memory workflow service for tests
//!
//! [`InMemoryWorkflow`] implements [`WorkflowApi`] over a map of executions that
//! tests mutate directly to script remote behavior: status changes, failures
//! injected per operation, latency, and starts the remote never acknowledges.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use stepdeck_core::dto::history::{HistoryEvent, HistoryPage, StateMachineDefinition};
use stepdeck_core::dto::remote::{
    ExecutionPage, MalformedRecord, RemoteExecution, StartRequest, StartedExecution,
};

use crate::api::WorkflowApi;
use crate::error::{RemoteError, RemoteErrorKind, Result};

/// Remote primitive, used to script failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Stop,
    Redrive,
    Describe,
    List,
    History,
    DescribeStateMachine,
}

#[derive(Default)]
struct State {
    executions: BTreeMap<String, RemoteExecution>,
    /// Insertion order; listings return newest first
    order: Vec<String>,
    malformed: HashMap<String, Vec<MalformedRecord>>,
    failures: HashMap<Operation, VecDeque<RemoteErrorKind>>,
    calls: HashMap<Operation, u32>,
    histories: HashMap<String, Vec<HistoryEvent>>,
    definitions: HashMap<String, StateMachineDefinition>,
    hide_start_ids: bool,
    invisible_starts: bool,
    latency: Option<Duration>,
}

/// Scriptable in-memory implementation of [`WorkflowApi`]
#[derive(Default)]
pub struct InMemoryWorkflow {
    state: Mutex<State>,
}

/// Builds a remote execution record for `target` in the given status
pub fn remote_execution(target: &str, name: &str, status: &str) -> RemoteExecution {
    RemoteExecution {
        execution_id: execution_id_for(target, name),
        target: target.to_string(),
        name: name.to_string(),
        status: status.to_string(),
        started_at: Some(Utc::now()),
        stopped_at: None,
        redrive_count: Some(0),
        error: None,
        cause: None,
        input: None,
    }
}

/// Execution identifier the fake assigns to `name` under `target`
pub fn execution_id_for(target: &str, name: &str) -> String {
    format!("{}:{}", target.replace(":stateMachine:", ":execution:"), name)
}

fn error_of(kind: RemoteErrorKind, detail: String) -> RemoteError {
    match kind {
        RemoteErrorKind::Throttled => RemoteError::Throttled(detail),
        RemoteErrorKind::NotFound => RemoteError::NotFound(detail),
        RemoteErrorKind::InvalidState => RemoteError::InvalidState(detail),
        RemoteErrorKind::Unauthorized => RemoteError::Unauthorized(detail),
        RemoteErrorKind::Transient => RemoteError::Transient(detail),
        RemoteErrorKind::Malformed => RemoteError::Malformed(detail),
        RemoteErrorKind::Unknown => RemoteError::Unknown(detail),
    }
}

impl InMemoryWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // =============================================================================
    // Scripting
    // =============================================================================

    /// Start calls succeed without returning an execution identifier
    pub fn hide_start_ids(&self) {
        self.lock().hide_start_ids = true;
    }

    /// Started executions never show up remotely
    pub fn make_starts_invisible(&self) {
        self.lock().invisible_starts = true;
    }

    /// Every call waits this long before answering
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// The next `times` calls of `operation` fail with `kind`
    pub fn fail_next(&self, operation: Operation, kind: RemoteErrorKind, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(kind, times));
    }

    pub fn insert(&self, execution: RemoteExecution) {
        let mut state = self.lock();
        let id = execution.execution_id.clone();
        if !state.executions.contains_key(&id) {
            state.order.push(id.clone());
        }
        state.executions.insert(id, execution);
    }

    pub fn insert_malformed(&self, target: &str, record: MalformedRecord) {
        self.lock()
            .malformed
            .entry(target.to_string())
            .or_default()
            .push(record);
    }

    pub fn remove(&self, execution_id: &str) {
        let mut state = self.lock();
        state.executions.remove(execution_id);
        state.order.retain(|id| id != execution_id);
    }

    /// Moves an execution to a remote status; final statuses get a stop date
    pub fn set_status(&self, execution_id: &str, status: &str) {
        if let Some(execution) = self.lock().executions.get_mut(execution_id) {
            execution.status = status.to_string();
            if status != "RUNNING" && status != "PENDING_REDRIVE" {
                execution.stopped_at = Some(Utc::now());
            }
        }
    }

    pub fn set_error(&self, execution_id: &str, error: &str, cause: &str) {
        if let Some(execution) = self.lock().executions.get_mut(execution_id) {
            execution.error = Some(error.to_string());
            execution.cause = Some(cause.to_string());
        }
    }

    pub fn set_redrive_count(&self, execution_id: &str, redrive_count: Option<u32>) {
        if let Some(execution) = self.lock().executions.get_mut(execution_id) {
            execution.redrive_count = redrive_count;
        }
    }

    pub fn set_definition(&self, definition: StateMachineDefinition) {
        self.lock()
            .definitions
            .insert(definition.target.clone(), definition);
    }

    pub fn push_history(&self, execution_id: &str, event: HistoryEvent) {
        self.lock()
            .histories
            .entry(execution_id.to_string())
            .or_default()
            .push(event);
    }

    // =============================================================================
    // Inspection
    // =============================================================================

    pub fn execution(&self, execution_id: &str) -> Option<RemoteExecution> {
        self.lock().executions.get(execution_id).cloned()
    }

    /// Executions of a target, newest first
    pub fn executions_for(&self, target: &str) -> Vec<RemoteExecution> {
        let state = self.lock();
        state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.executions.get(id))
            .filter(|execution| execution.target == target)
            .cloned()
            .collect()
    }

    pub fn calls(&self, operation: Operation) -> u32 {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Counts the call, waits out any latency and fires a scripted failure
    async fn enter(&self, operation: Operation) -> Result<()> {
        let (latency, failure) = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_default() += 1;
            let failure = state
                .failures
                .get_mut(&operation)
                .and_then(VecDeque::pop_front);
            (state.latency, failure)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match failure {
            Some(kind) => Err(error_of(kind, format!("scripted {:?} failure", operation))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkflowApi for InMemoryWorkflow {
    async fn start_execution(&self, request: &StartRequest) -> Result<StartedExecution> {
        self.enter(Operation::Start).await?;

        let mut state = self.lock();
        let id = execution_id_for(&request.target, &request.name);
        let started_at = Some(Utc::now());

        if !state.invisible_starts && !state.executions.contains_key(&id) {
            let mut execution = remote_execution(&request.target, &request.name, "RUNNING");
            execution.started_at = started_at;
            execution.input = Some(request.input.clone());
            state.order.push(id.clone());
            state.executions.insert(id.clone(), execution);
        }

        Ok(StartedExecution {
            execution_id: (!state.hide_start_ids).then_some(id),
            started_at,
        })
    }

    async fn stop_execution(&self, execution_id: &str) -> Result<()> {
        self.enter(Operation::Stop).await?;

        let mut state = self.lock();
        let execution = state
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| RemoteError::NotFound(execution_id.to_string()))?;
        if execution.status != "RUNNING" {
            return Err(RemoteError::InvalidState(format!(
                "execution is {}",
                execution.status
            )));
        }
        execution.status = "STOPPED".to_string();
        execution.stopped_at = Some(Utc::now());
        Ok(())
    }

    async fn redrive_execution(&self, execution_id: &str) -> Result<()> {
        self.enter(Operation::Redrive).await?;

        let mut state = self.lock();
        let execution = state
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| RemoteError::NotFound(execution_id.to_string()))?;
        if execution.status != "FAILED" {
            return Err(RemoteError::InvalidState(format!(
                "ExecutionNotRedrivable: execution is {}",
                execution.status
            )));
        }
        execution.status = "RUNNING".to_string();
        execution.stopped_at = None;
        execution.error = None;
        execution.cause = None;
        execution.redrive_count = Some(execution.redrive_count.unwrap_or(0) + 1);
        Ok(())
    }

    async fn describe_execution(&self, execution_id: &str) -> Result<RemoteExecution> {
        self.enter(Operation::Describe).await?;
        self.execution(execution_id)
            .ok_or_else(|| RemoteError::NotFound(execution_id.to_string()))
    }

    async fn list_executions(
        &self,
        target: &str,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<ExecutionPage> {
        self.enter(Operation::List).await?;

        let offset: usize = match next_token {
            Some(token) => token
                .parse()
                .map_err(|_| RemoteError::Unknown(format!("invalid next token {}", token)))?,
            None => 0,
        };
        let all = self.executions_for(target);
        let end = (offset + page_size as usize).min(all.len());

        let mut items: Vec<_> = all[offset.min(end)..end].iter().cloned().map(Ok).collect();
        if offset == 0 {
            let state = self.lock();
            if let Some(malformed) = state.malformed.get(target) {
                items.extend(malformed.iter().cloned().map(Err));
            }
        }

        Ok(ExecutionPage {
            items,
            next_token: (end < all.len()).then(|| end.to_string()),
        })
    }

    async fn get_execution_history(
        &self,
        execution_id: &str,
        _next_token: Option<&str>,
    ) -> Result<HistoryPage> {
        self.enter(Operation::History).await?;

        let state = self.lock();
        if !state.executions.contains_key(execution_id) {
            return Err(RemoteError::NotFound(execution_id.to_string()));
        }
        Ok(HistoryPage {
            events: state.histories.get(execution_id).cloned().unwrap_or_default(),
            next_token: None,
        })
    }

    async fn describe_state_machine(&self, target: &str) -> Result<StateMachineDefinition> {
        self.enter(Operation::DescribeStateMachine).await?;
        self.lock()
            .definitions
            .get(target)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(target.to_string()))
    }
}
