//! Remote execution DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::execution::ExecutionStatus;

/// One execution as reported by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteExecution {
    /// Remote execution identifier (execution ARN)
    pub execution_id: String,
    /// Execution-target identifier the execution belongs to
    pub target: String,
    pub name: String,
    /// Raw status string, mapped defensively by [`RemoteExecution::status`]
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub redrive_count: Option<u32>,
    /// Only populated by describe calls
    pub error: Option<String>,
    pub cause: Option<String>,
    pub input: Option<String>,
}

impl RemoteExecution {
    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus::from_remote(&self.status)
    }

    /// Short error summary suitable for a table cell
    pub fn error_summary(&self) -> Option<String> {
        const MAX_SUMMARY: usize = 240;

        let summary = match (&self.error, &self.cause) {
            (Some(error), Some(cause)) => format!("{}: {}", error, cause),
            (Some(error), None) => error.clone(),
            (None, Some(cause)) => cause.clone(),
            (None, None) => return None,
        };

        if summary.chars().count() > MAX_SUMMARY {
            let truncated: String = summary.chars().take(MAX_SUMMARY - 1).collect();
            Some(format!("{}…", truncated))
        } else {
            Some(summary)
        }
    }
}

/// A remote record that could not be decoded
///
/// Carries the identifier when it could still be recovered, so the engine can
/// quarantine the matching local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub execution_id: Option<String>,
    pub reason: String,
}

/// One page of a cursored execution listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPage {
    pub items: Vec<Result<RemoteExecution, MalformedRecord>>,
    pub next_token: Option<String>,
}

/// Result of a successful start call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedExecution {
    /// `None` when the remote does not return an identifier synchronously
    pub execution_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Request to start an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub target: String,
    /// Execution name; the remote treats it as an idempotency token
    pub name: String,
    /// JSON-encoded input document
    pub input: String,
}
