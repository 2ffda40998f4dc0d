//! Execution domain types
//!
//! An [`ExecutionRecord`] is the console's local view of one remote execution.
//! Its status only ever moves forward along the state machine below; anything
//! else is judged stale and dropped by the reconciliation engine.
//!
//! ```text
//! PENDING_CONFIRM -> RUNNING -> {SUCCEEDED, FAILED, STOPPED, TIMED_OUT, ABORTED}
//! PENDING_CONFIRM -> UNCONFIRMED_TIMEOUT
//! FAILED -> REDRIVEN -> RUNNING            (at most once per execution)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Execution status as tracked by the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Start accepted locally, not yet seen remotely
    PendingConfirm,
    Running,
    /// Redrive issued against a failed execution, not yet running again
    Redriven,
    Succeeded,
    Failed,
    Stopped,
    TimedOut,
    Aborted,
    /// Speculative record never confirmed by the remote service
    UnconfirmedTimeout,
    /// Remote reported something the console cannot interpret
    Unknown,
}

impl ExecutionStatus {
    /// Maps a remote status string onto the local enum.
    ///
    /// The remote vocabulary is a superset of ours; anything unrecognised becomes
    /// `Unknown` rather than an error.
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => ExecutionStatus::Running,
            "SUCCEEDED" => ExecutionStatus::Succeeded,
            "FAILED" => ExecutionStatus::Failed,
            "STOPPED" => ExecutionStatus::Stopped,
            "TIMED_OUT" => ExecutionStatus::TimedOut,
            "ABORTED" => ExecutionStatus::Aborted,
            "PENDING_REDRIVE" => ExecutionStatus::Redriven,
            _ => ExecutionStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::PendingConfirm => "PENDING_CONFIRM",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Redriven => "REDRIVEN",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Stopped => "STOPPED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
            ExecutionStatus::Aborted => "ABORTED",
            ExecutionStatus::UnconfirmedTimeout => "UNCONFIRMED_TIMEOUT",
            ExecutionStatus::Unknown => "UNKNOWN",
        }
    }

    /// No transition leaves a final status
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Stopped
                | ExecutionStatus::TimedOut
                | ExecutionStatus::Aborted
                | ExecutionStatus::UnconfirmedTimeout
        )
    }

    /// Statuses the remote service reports when a run ends
    pub fn is_outcome(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Stopped
                | ExecutionStatus::TimedOut
                | ExecutionStatus::Aborted
        )
    }

    /// Work may still be happening remotely
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ExecutionStatus::PendingConfirm
                | ExecutionStatus::Running
                | ExecutionStatus::Redriven
                | ExecutionStatus::Unknown
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an execution: environment plus remote execution identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub environment: String,
    pub execution_id: String,
}

impl ExecutionKey {
    pub fn new(environment: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            execution_id: execution_id.into(),
        }
    }
}

impl std::fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.environment, self.execution_id)
    }
}

/// Outcome of judging a proposed status change against a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Same status; refresh details only
    Unchanged,
    /// Forward transition along the state machine
    Apply,
    /// Forward transition that consumes the record's single redrive
    Redrive,
    /// Would move the record backwards; discard
    Stale,
}

/// Local view of one remote execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub key: ExecutionKey,
    pub pipeline: String,
    /// Execution name; doubles as the idempotency token for starts
    pub name: String,
    pub status: ExecutionStatus,
    /// Status held before the record was quarantined as `Unknown`
    pub last_known_status: Option<ExecutionStatus>,
    /// When a local start command was accepted (speculative records only)
    pub requested_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Validated launch parameters
    pub input: BTreeMap<String, JsonValue>,
    pub error_summary: Option<String>,
    /// Poll sequence number of the last applied observation
    pub revision: u64,
    pub redrive_count: u32,
    /// Observations discarded as stale (diagnostics only)
    pub stale_observations: u32,
    /// Ticks spent waiting for confirmation while `PendingConfirm`
    pub pending_ticks: u32,
    /// When a stop was requested through the console, until the remote confirms
    pub stop_requested_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Creates the speculative record for a start command that was just accepted
    pub fn speculative(
        key: ExecutionKey,
        pipeline: impl Into<String>,
        name: impl Into<String>,
        input: BTreeMap<String, JsonValue>,
    ) -> Self {
        Self {
            key,
            pipeline: pipeline.into(),
            name: name.into(),
            status: ExecutionStatus::PendingConfirm,
            last_known_status: None,
            requested_at: Some(Utc::now()),
            started_at: None,
            stopped_at: None,
            input,
            error_summary: None,
            revision: 0,
            redrive_count: 0,
            stale_observations: 0,
            pending_ticks: 0,
            stop_requested_at: None,
        }
    }

    pub fn is_speculative(&self) -> bool {
        self.status == ExecutionStatus::PendingConfirm
    }

    /// Status used for transition checks; quarantine does not erase progress
    pub fn effective_status(&self) -> ExecutionStatus {
        match (self.status, self.last_known_status) {
            (ExecutionStatus::Unknown, Some(known)) => known,
            (status, _) => status,
        }
    }

    /// Judges whether moving to `next` is a forward step for this record.
    ///
    /// `observed_redrives` is the remote redrive count carried by the observation,
    /// when the remote reports one.
    pub fn judge(&self, next: ExecutionStatus, observed_redrives: Option<u32>) -> Verdict {
        use ExecutionStatus::*;

        let from = self.effective_status();

        if next == self.status {
            return Verdict::Unchanged;
        }
        if self.status == Unknown && next == from {
            return Verdict::Apply;
        }

        match next {
            PendingConfirm => return Verdict::Stale,
            Unknown if from.is_final() => return Verdict::Stale,
            Unknown => return Verdict::Apply,
            _ => {}
        }

        let redrives = observed_redrives.unwrap_or(0);
        match from {
            PendingConfirm if next == Running || next == UnconfirmedTimeout || next.is_outcome() => {
                Verdict::Apply
            }
            Running if next.is_outcome() => Verdict::Apply,
            Failed if self.redrive_count == 0 => match next {
                Redriven => Verdict::Redrive,
                Running if redrives > 0 => Verdict::Redrive,
                _ => Verdict::Stale,
            },
            // A RUNNING from before the failure carries an older redrive count
            Redriven
                if next == Running
                    && observed_redrives.is_none_or(|n| n >= self.redrive_count.max(1)) =>
            {
                Verdict::Apply
            }
            Redriven if next.is_outcome() && redrives >= self.redrive_count.max(1) => {
                Verdict::Apply
            }
            Unknown => Verdict::Apply,
            _ => Verdict::Stale,
        }
    }
}
