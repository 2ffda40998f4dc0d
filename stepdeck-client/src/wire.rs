//! Wire shapes of the workflow service's JSON protocol
//!
//! Timestamps travel as fractional epoch seconds. List items are decoded one by
//! one so a single bad entry cannot fail the whole page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use stepdeck_core::dto::history::{HistoryEvent, StateMachineDefinition};
use stepdeck_core::dto::remote::{MalformedRecord, RemoteExecution};

fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: Option<f64> = Option::deserialize(deserializer)?;
    Ok(seconds.and_then(|s| DateTime::from_timestamp_millis((s * 1000.0).round() as i64)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartExecutionInput<'a> {
    pub state_machine_arn: &'a str,
    pub name: &'a str,
    pub input: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartExecutionOutput {
    pub execution_arn: Option<String>,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub start_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExecutionArnInput<'a> {
    pub execution_arn: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StateMachineArnInput<'a> {
    pub state_machine_arn: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListExecutionsInput<'a> {
    pub state_machine_arn: &'a str,
    pub max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListExecutionsOutput {
    #[serde(default)]
    pub executions: Vec<JsonValue>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetExecutionHistoryInput<'a> {
    pub execution_arn: &'a str,
    pub max_results: u32,
    pub reverse_order: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetExecutionHistoryOutput {
    #[serde(default)]
    pub events: Vec<WireHistoryEvent>,
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireHistoryEvent {
    pub id: i64,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub state_entered_event_details: Option<StateEventDetails>,
    pub state_exited_event_details: Option<StateEventDetails>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StateEventDetails {
    pub name: String,
}

impl From<WireHistoryEvent> for HistoryEvent {
    fn from(event: WireHistoryEvent) -> Self {
        let state_name = event
            .state_entered_event_details
            .or(event.state_exited_event_details)
            .map(|details| details.name);
        Self {
            id: event.id,
            timestamp: event.timestamp,
            event_type: event.event_type,
            state_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DescribeStateMachineOutput {
    pub state_machine_arn: String,
    pub name: String,
    pub definition: String,
}

impl TryFrom<DescribeStateMachineOutput> for StateMachineDefinition {
    type Error = serde_json::Error;

    fn try_from(output: DescribeStateMachineOutput) -> Result<Self, Self::Error> {
        Ok(Self {
            target: output.state_machine_arn,
            name: output.name,
            definition: serde_json::from_str(&output.definition)?,
        })
    }
}

/// Execution as returned by describe and list calls
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireExecution {
    pub execution_arn: String,
    pub state_machine_arn: String,
    pub name: String,
    pub status: String,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub stop_date: Option<DateTime<Utc>>,
    pub redrive_count: Option<u32>,
    pub error: Option<String>,
    pub cause: Option<String>,
    pub input: Option<String>,
}

impl From<WireExecution> for RemoteExecution {
    fn from(wire: WireExecution) -> Self {
        Self {
            execution_id: wire.execution_arn,
            target: wire.state_machine_arn,
            name: wire.name,
            status: wire.status,
            started_at: wire.start_date,
            stopped_at: wire.stop_date,
            redrive_count: wire.redrive_count,
            error: wire.error,
            cause: wire.cause,
            input: wire.input,
        }
    }
}

/// Decodes one listed execution, keeping its identifier when decoding fails
pub(crate) fn decode_execution(value: JsonValue) -> Result<RemoteExecution, MalformedRecord> {
    let execution_id = value
        .get("executionArn")
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    serde_json::from_value::<WireExecution>(value)
        .map(RemoteExecution::from)
        .map_err(|e| MalformedRecord {
            execution_id,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_execution() {
        let decoded = decode_execution(json!({
            "executionArn": "arn:aws:states:eu-west-1:123456789012:execution:reviews:run",
            "stateMachineArn": "arn:aws:states:eu-west-1:123456789012:stateMachine:reviews",
            "name": "run",
            "status": "RUNNING",
            "startDate": 1700000000.25,
            "redriveCount": 0
        }))
        .unwrap();

        assert_eq!(decoded.name, "run");
        assert_eq!(
            decoded.started_at.unwrap().timestamp_millis(),
            1_700_000_000_250
        );
        assert_eq!(decoded.stopped_at, None);
        assert_eq!(decoded.redrive_count, Some(0));
    }

    #[test]
    fn test_malformed_execution_keeps_identifier() {
        let err = decode_execution(json!({
            "executionArn": "arn:exec:broken",
            "status": 17
        }))
        .unwrap_err();
        assert_eq!(err.execution_id.as_deref(), Some("arn:exec:broken"));

        let err = decode_execution(json!("garbage")).unwrap_err();
        assert_eq!(err.execution_id, None);
    }

    #[test]
    fn test_history_event_state_name() {
        let event: WireHistoryEvent = serde_json::from_value(json!({
            "id": 3,
            "timestamp": 1700000001.0,
            "type": "TaskStateExited",
            "stateExitedEventDetails": { "name": "Review" }
        }))
        .unwrap();
        let event = HistoryEvent::from(event);
        assert_eq!(event.state_name.as_deref(), Some("Review"));
    }
}
