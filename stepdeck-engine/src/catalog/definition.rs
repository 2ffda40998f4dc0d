//! Definition file parsing
//!
//! A definition is YAML (`.yaml`, `.yml`) or a Lua chunk (`.lua`) returning the
//! same table:
//!
//! ```yaml
//! display_name: Refactoring reviews
//! environments:
//!   staging: arn:aws:states:eu-west-1:123456789012:stateMachine:reviews
//! parameters:
//!   product_ids:
//!     description: Comma separated product ids
//!     type: string
//!   language:
//!     description: Review language
//!     type: select
//!     options: [en, fr, de]
//!     default: en
//! files:
//!   output_directory: reviews/outputs
//! ```
//!
//! `parameters` is either a map keyed by name (file order is kept) or a list of
//! specs each carrying a `name`. The pipeline is named by an optional `name`
//! field, falling back to the file stem.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use stepdeck_core::domain::pipeline::{OutputLocation, ParameterKind, ParameterSpec, PipelineConfig};

use super::error::{ConfigError, ConfigErrorKind};

/// Definition file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Lua,
}

impl DefinitionFormat {
    /// Format of a file by extension; `None` for files that are not definitions
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(DefinitionFormat::Yaml),
            "lua" => Some(DefinitionFormat::Lua),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    #[serde(default)]
    name: Option<String>,
    display_name: String,
    #[serde(default)]
    environments: BTreeMap<String, Option<String>>,
    #[serde(default)]
    parameters: RawParameters,
    files: OutputLocation,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParameter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    default: Option<JsonValue>,
    #[serde(default)]
    multiple: Option<bool>,
    #[serde(default)]
    options: Option<Vec<String>>,
    #[serde(default)]
    optional: bool,
}

/// Parameters in declaration order
#[derive(Debug, Default)]
struct RawParameters(Vec<RawParameter>);

impl<'de> Deserialize<'de> for RawParameters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParametersVisitor;

        impl<'de> Visitor<'de> for ParametersVisitor {
            type Value = RawParameters;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter specs or a list of named parameter specs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut parameters = Vec::new();
                while let Some((name, mut spec)) = map.next_entry::<String, RawParameter>()? {
                    if spec.name.as_deref().is_some_and(|inner| inner != name) {
                        return Err(de::Error::custom(format!(
                            "parameter '{}' declares a different name",
                            name
                        )));
                    }
                    spec.name = Some(name);
                    parameters.push(spec);
                }
                Ok(RawParameters(parameters))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut parameters = Vec::new();
                while let Some(spec) = seq.next_element::<RawParameter>()? {
                    parameters.push(spec);
                }
                Ok(RawParameters(parameters))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(RawParameters::default())
            }
        }

        deserializer.deserialize_any(ParametersVisitor)
    }
}

/// Checks `arn:aws:states:<region>:<12-digit account>:stateMachine:<name>`
pub fn is_state_machine_arn(target: &str) -> bool {
    let parts: Vec<&str> = target.splitn(7, ':').collect();
    let [arn, partition, service, region, account, resource, name] = parts.as_slice() else {
        return false;
    };

    *arn == "arn"
        && *partition == "aws"
        && *service == "states"
        && !region.is_empty()
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && account.len() == 12
        && account.chars().all(|c| c.is_ascii_digit())
        && *resource == "stateMachine"
        && !name.is_empty()
}

/// Parses and validates one definition file's contents
///
/// # Arguments
/// * `path` - The file the source was read from; names the pipeline when the
///   definition has no `name`
/// * `source` - File contents
/// * `known_environments` - Environments definitions may target
pub fn parse_definition(
    path: &Path,
    source: &str,
    known_environments: &[String],
) -> Result<PipelineConfig, ConfigError> {
    let format = DefinitionFormat::from_path(path).ok_or_else(|| {
        ConfigError::new(path, ConfigErrorKind::Parse, "unsupported file extension")
    })?;

    let raw = match format {
        DefinitionFormat::Yaml => {
            let value: serde_yaml::Value = serde_yaml::from_str(source)
                .map_err(|e| ConfigError::new(path, ConfigErrorKind::Parse, e.to_string()))?;
            serde_yaml::from_value::<RawDefinition>(value)
                .map_err(|e| ConfigError::schema(path, e.to_string()))?
        }
        DefinitionFormat::Lua => {
            let chunk_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("definition.lua");
            let value: JsonValue = stepdeck_lua::evaluate_definition(source, chunk_name)
                .map_err(|e| ConfigError::new(path, ConfigErrorKind::Parse, format!("{:#}", e)))?;
            serde_json::from_value::<RawDefinition>(value)
                .map_err(|e| ConfigError::schema(path, e.to_string()))?
        }
    };

    build_pipeline(path, raw, known_environments)
}

fn build_pipeline(
    path: &Path,
    raw: RawDefinition,
    known_environments: &[String],
) -> Result<PipelineConfig, ConfigError> {
    let name = match raw.name {
        Some(name) => name.trim().to_string(),
        None => path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string(),
    };
    if name.is_empty() {
        return Err(ConfigError::schema(path, "pipeline name is empty"));
    }

    let display_name = raw.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ConfigError::schema(path, "display_name is empty"));
    }

    if raw.files.output_directory.trim().is_empty() {
        return Err(ConfigError::schema(path, "files.output_directory is empty"));
    }

    let mut environments = BTreeMap::new();
    for (environment, target) in raw.environments {
        let Some(target) = target else {
            continue;
        };
        if !known_environments.contains(&environment) {
            return Err(ConfigError::new(
                path,
                ConfigErrorKind::UnknownEnvironment,
                format!(
                    "environment '{}' is not one of [{}]",
                    environment,
                    known_environments.join(", ")
                ),
            ));
        }
        if !is_state_machine_arn(&target) {
            return Err(ConfigError::schema(
                path,
                format!("invalid state machine ARN for '{}': {}", environment, target),
            ));
        }
        environments.insert(environment, target);
    }

    let mut seen = BTreeSet::new();
    let mut parameters = Vec::with_capacity(raw.parameters.0.len());
    for raw_parameter in raw.parameters.0 {
        let spec = parameter_spec(raw_parameter).map_err(|message| ConfigError::schema(path, message))?;
        if !seen.insert(spec.name.clone()) {
            return Err(ConfigError::schema(
                path,
                format!("parameter '{}' is declared twice", spec.name),
            ));
        }
        parameters.push(spec);
    }

    Ok(PipelineConfig {
        name,
        display_name,
        parameters,
        environments,
        files: raw.files,
    })
}

fn parameter_spec(raw: RawParameter) -> Result<ParameterSpec, String> {
    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "parameter without a name".to_string())?;
    let context = |message: String| format!("parameter '{}': {}", name, message);

    if raw.kind != "select" {
        if raw.options.is_some() {
            return Err(context(format!("options are not allowed for type '{}'", raw.kind)));
        }
        if raw.multiple == Some(true) {
            return Err(context(format!("multiple is not allowed for type '{}'", raw.kind)));
        }
    }

    let default = raw.default.filter(|d| !d.is_null());
    let kind = match raw.kind.as_str() {
        "string" | "text" => {
            let default = match default {
                None => None,
                Some(JsonValue::String(s)) => Some(s),
                Some(JsonValue::Number(n)) => Some(n.to_string()),
                Some(other) => return Err(context(format!("default {} is not a string", other))),
            };
            if raw.kind == "text" {
                ParameterKind::Text { default }
            } else {
                ParameterKind::String { default }
            }
        }
        "integer" => {
            let default = match default {
                None => None,
                Some(value) => Some(
                    value
                        .as_i64()
                        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                        .ok_or_else(|| context(format!("default {} is not an integer", value)))?,
                ),
            };
            ParameterKind::Integer { default }
        }
        "boolean" => {
            let default = match default {
                None => None,
                Some(JsonValue::Bool(b)) => Some(b),
                Some(other) => {
                    return Err(context(format!("default {} is not true or false", other)));
                }
            };
            ParameterKind::Boolean { default }
        }
        "select" => {
            let options = raw.options.unwrap_or_default();
            if options.is_empty() {
                return Err(context("select requires at least one option".to_string()));
            }
            let multiple = raw.multiple.unwrap_or(false);

            let default: Vec<String> = match default {
                None => Vec::new(),
                Some(JsonValue::String(s)) => vec![s],
                Some(JsonValue::Array(values)) if multiple => values
                    .into_iter()
                    .map(|v| match v {
                        JsonValue::String(s) => Ok(s),
                        other => Err(context(format!("default {} is not an option", other))),
                    })
                    .collect::<Result<_, _>>()?,
                Some(other) => return Err(context(format!("default {} is not an option", other))),
            };
            if let Some(outside) = default.iter().find(|d| !options.contains(d)) {
                return Err(context(format!(
                    "default '{}' is not one of [{}]",
                    outside,
                    options.join(", ")
                )));
            }

            ParameterKind::Select {
                options,
                multiple,
                default,
            }
        }
        other => return Err(context(format!("unknown type '{}'", other))),
    };

    Ok(ParameterSpec {
        name,
        description: raw.description,
        optional: raw.optional,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envs() -> Vec<String> {
        vec!["development".to_string(), "staging".to_string(), "production".to_string()]
    }

    const REVIEWS: &str = r#"
display_name: Refactoring reviews
environments:
  staging: arn:aws:states:eu-west-1:123456789012:stateMachine:reviews
  production:
parameters:
  product_ids:
    description: Comma separated product ids
    type: string
  language:
    description: Review language
    type: select
    options: [en, fr, de]
    default: en
  dialect_localization:
    description: Dialect handling
    type: select
    options: [skip, apply]
    default: skip
  fail:
    description: Force a failure at the end
    type: boolean
    default: false
files:
  output_directory: reviews/outputs
"#;

    #[test]
    fn test_parses_yaml_in_declaration_order() {
        let pipeline =
            parse_definition(Path::new("configs/refactoring-reviews.yaml"), REVIEWS, &envs()).unwrap();

        assert_eq!(pipeline.name, "refactoring-reviews");
        assert_eq!(pipeline.display_name, "Refactoring reviews");
        let names: Vec<_> = pipeline.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["product_ids", "language", "dialect_localization", "fail"]);
        // Environments left empty are not deployed
        assert_eq!(pipeline.environments.len(), 1);
        assert!(pipeline.target_for("staging").is_some());
    }

    #[test]
    fn test_parses_lua_definition() {
        let source = r#"
            return pipeline.define({
                name = "translations",
                display_name = "Translations",
                environments = {
                    development = "arn:aws:states:eu-west-1:123456789012:stateMachine:translations",
                },
                parameters = {
                    pipeline.parameter("batch", { type = "integer", default = 10 }),
                    pipeline.parameter("targets", {
                        type = "select",
                        multiple = true,
                        options = { "fr", "de", "es" },
                        default = { "fr", "de" },
                    }),
                },
                files = { output_directory = "translations" },
            })
        "#;

        let pipeline = parse_definition(Path::new("whatever.lua"), source, &envs()).unwrap();
        assert_eq!(pipeline.name, "translations");
        assert_eq!(pipeline.parameters[0].kind, ParameterKind::Integer { default: Some(10) });
        assert_eq!(
            pipeline.parameters[1].kind,
            ParameterKind::Select {
                options: vec!["fr".to_string(), "de".to_string(), "es".to_string()],
                multiple: true,
                default: vec!["fr".to_string(), "de".to_string()],
            }
        );
    }

    #[test]
    fn test_out_of_range_select_default() {
        let source = REVIEWS.replace("default: en", "default: it");
        let err = parse_definition(Path::new("reviews.yaml"), &source, &envs()).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::SchemaViolation);
        assert!(err.message.contains("'it'"));
    }

    #[test]
    fn test_schema_violations() {
        let cases = [
            REVIEWS.replace("type: boolean", "type: datetime"),
            REVIEWS.replace("default: false", "default: maybe"),
            REVIEWS.replace("    type: string", "    type: string\n    options: [a]"),
            REVIEWS.replace("options: [skip, apply]", "options: []"),
            REVIEWS.replace(":123456789012:", ":1234:"),
            REVIEWS.replace("display_name: Refactoring reviews", "display_name: ''"),
            REVIEWS.replace("files:", "extra: 1\nfiles:"),
        ];
        for source in cases {
            let err = parse_definition(Path::new("reviews.yaml"), &source, &envs()).unwrap_err();
            assert_eq!(err.kind, ConfigErrorKind::SchemaViolation, "{}", err);
        }
    }

    #[test]
    fn test_unknown_environment() {
        let source = REVIEWS.replace("  staging:", "  qa:");
        let err = parse_definition(Path::new("reviews.yaml"), &source, &envs()).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::UnknownEnvironment);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_definition(Path::new("bad.yaml"), "display_name: [unclosed", &envs()).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::Parse);

        let err = parse_definition(Path::new("bad.lua"), "return {", &envs()).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::Parse);
    }

    #[test]
    fn test_state_machine_arn() {
        assert!(is_state_machine_arn(
            "arn:aws:states:eu-west-1:123456789012:stateMachine:reviews"
        ));
        assert!(is_state_machine_arn(
            "arn:aws:states:us-east-1:123456789012:stateMachine:with:colons"
        ));
        assert!(!is_state_machine_arn(
            "arn:aws:states:eu-west-1:123456789012:execution:reviews:run"
        ));
        assert!(!is_state_machine_arn(
            "arn:aws:lambda:eu-west-1:123456789012:stateMachine:reviews"
        ));
        assert!(!is_state_machine_arn("arn:aws:states:eu-west-1:123:stateMachine:x"));
        assert!(!is_state_machine_arn("arn:aws:states:eu-west-1:123456789012:stateMachine:"));
    }
}
