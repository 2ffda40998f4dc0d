//! Pipeline domain types

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Pipeline definition
///
/// Loaded from one definition file. Immutable once loaded; a reload replaces the
/// whole set of pipelines rather than editing one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identity used by commands; the definition's `name` or its file stem
    pub name: String,
    /// Human readable title
    pub display_name: String,
    /// Declared parameters in file order
    pub parameters: Vec<ParameterSpec>,
    /// Environment name to execution-target identifier (state machine ARN)
    pub environments: BTreeMap<String, String>,
    pub files: OutputLocation,
}

impl PipelineConfig {
    /// Execution target for the given environment, if the pipeline runs there
    pub fn target_for(&self, environment: &str) -> Option<&str> {
        self.environments.get(environment).map(String::as_str)
    }

    /// Iterates over the environments this pipeline is deployed to
    pub fn environments(&self) -> impl Iterator<Item = Environment> + '_ {
        self.environments.iter().map(|(name, target)| Environment {
            name: name.clone(),
            target: target.clone(),
        })
    }

    /// Looks up a declared parameter by name
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Object storage prefix under which an execution writes its artifacts
    pub fn artifact_prefix(&self, execution_id: &str) -> String {
        let run_id = execution_id.rsplit(':').next().unwrap_or(execution_id);
        format!(
            "{}/{}/",
            self.files.output_directory.trim_end_matches('/'),
            run_id
        )
    }
}

/// One deployment of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub target: String,
}

/// Where a pipeline's executions store their output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLocation {
    pub output_directory: String,
}

/// A single declared launch parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
    /// Explicitly optional parameters may be omitted or left empty
    #[serde(default)]
    pub optional: bool,
    pub kind: ParameterKind,
}

/// Parameter kind with the fields that kind needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterKind {
    String {
        default: Option<String>,
    },
    /// Multi-line free text; validated like `String`
    Text {
        default: Option<String>,
    },
    Integer {
        default: Option<i64>,
    },
    Boolean {
        default: Option<bool>,
    },
    Select {
        options: Vec<String>,
        multiple: bool,
        /// Empty when no default is declared
        default: Vec<String>,
    },
}

impl ParameterKind {
    /// Name used in definition files
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterKind::String { .. } => "string",
            ParameterKind::Text { .. } => "text",
            ParameterKind::Integer { .. } => "integer",
            ParameterKind::Boolean { .. } => "boolean",
            ParameterKind::Select { .. } => "select",
        }
    }

    /// The declared default rendered as the JSON value sent to the remote service
    pub fn default_value(&self) -> Option<JsonValue> {
        match self {
            ParameterKind::String { default } | ParameterKind::Text { default } => {
                default.clone().map(JsonValue::String)
            }
            ParameterKind::Integer { default } => default.map(JsonValue::from),
            ParameterKind::Boolean { default } => default.map(JsonValue::Bool),
            ParameterKind::Select {
                multiple, default, ..
            } => match (multiple, default.as_slice()) {
                (_, []) => None,
                (true, values) => Some(JsonValue::Array(
                    values.iter().cloned().map(JsonValue::String).collect(),
                )),
                (false, [value, ..]) => Some(JsonValue::String(value.clone())),
            },
        }
    }
}
