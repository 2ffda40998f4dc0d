//! Execution history DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One event from an execution's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: i64,
    pub timestamp: Option<DateTime<Utc>>,
    /// Remote event type, e.g. `TaskStateEntered`
    pub event_type: String,
    /// State name for state entered/exited events
    pub state_name: Option<String>,
}

/// One page of execution history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    pub next_token: Option<String>,
}

/// State machine definition as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineDefinition {
    pub target: String,
    pub name: String,
    /// Raw definition document
    pub definition: serde_json::Value,
}

impl StateMachineDefinition {
    /// Names of the top-level states declared by the definition
    pub fn state_names(&self) -> Vec<String> {
        self.definition
            .get("States")
            .and_then(|states| states.as_object())
            .map(|states| states.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Progress of a single state within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateProgress {
    NotStarted,
    Running,
    Completed,
}

/// Folds history events into per-state progress.
///
/// Every state declared in `states` starts as `NotStarted`; `*StateEntered`
/// events mark a state running and `*StateExited` events mark it completed.
pub fn state_progress(
    states: &[String],
    events: &[HistoryEvent],
) -> BTreeMap<String, StateProgress> {
    let mut progress: BTreeMap<String, StateProgress> = states
        .iter()
        .map(|name| (name.clone(), StateProgress::NotStarted))
        .collect();

    for event in events {
        let Some(state) = &event.state_name else {
            continue;
        };
        if event.event_type.contains("StateEntered") {
            progress.insert(state.clone(), StateProgress::Running);
        } else if event.event_type.contains("StateExited") {
            progress.insert(state.clone(), StateProgress::Completed);
        }
    }

    progress
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: i64, event_type: &str, state: Option<&str>) -> HistoryEvent {
        HistoryEvent {
            id,
            timestamp: None,
            event_type: event_type.to_string(),
            state_name: state.map(str::to_string),
        }
    }

    #[test]
    fn test_state_progress() {
        let states = vec![
            "Fetch".to_string(),
            "Review".to_string(),
            "Publish".to_string(),
        ];
        let events = vec![
            event(1, "ExecutionStarted", None),
            event(2, "TaskStateEntered", Some("Fetch")),
            event(3, "TaskStateExited", Some("Fetch")),
            event(4, "TaskStateEntered", Some("Review")),
        ];

        let progress = state_progress(&states, &events);
        assert_eq!(progress["Fetch"], StateProgress::Completed);
        assert_eq!(progress["Review"], StateProgress::Running);
        assert_eq!(progress["Publish"], StateProgress::NotStarted);
    }

    #[test]
    fn test_state_names_from_definition() {
        let definition = StateMachineDefinition {
            target: "arn".to_string(),
            name: "reviews".to_string(),
            definition: serde_json::json!({
                "StartAt": "Fetch",
                "States": { "Fetch": {}, "Review": {} }
            }),
        };
        assert_eq!(definition.state_names(), vec!["Fetch", "Review"]);
    }
}
