//! Parameter Validator
//!
//! Checks raw launch parameters against a pipeline's declared schema and produces
//! the normalized input sent to the remote service. Pure: no I/O, no clock.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use stepdeck_core::domain::pipeline::{ParameterKind, ParameterSpec, PipelineConfig};
use thiserror::Error;

/// Raw parameters as supplied by an operator
pub type RawParams = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    UnknownParameter,
    MissingParameter,
    MultiplicityViolation,
    TypeMismatch,
    InvalidOption,
    EmptyValue,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationErrorKind::UnknownParameter => "unknown parameter",
            ValidationErrorKind::MissingParameter => "missing parameter",
            ValidationErrorKind::MultiplicityViolation => "too many values",
            ValidationErrorKind::TypeMismatch => "type mismatch",
            ValidationErrorKind::InvalidOption => "invalid option",
            ValidationErrorKind::EmptyValue => "empty value",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{parameter}: {kind}: {message}")]
pub struct ValidationError {
    pub parameter: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl ValidationError {
    fn new(parameter: &str, kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            parameter: parameter.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// Launch parameters that passed validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParams {
    values: BTreeMap<String, JsonValue>,
}

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.values.get(name)
    }

    pub fn as_map(&self) -> &BTreeMap<String, JsonValue> {
        &self.values
    }

    pub fn into_map(self) -> BTreeMap<String, JsonValue> {
        self.values
    }

    /// JSON document used as execution input
    pub fn to_input_json(&self) -> String {
        JsonValue::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
        .to_string()
    }
}

/// Validates `raw` against the parameters declared by `pipeline`
///
/// Undeclared keys are rejected first; declared parameters are then checked in
/// declaration order and the first failure is returned. A `null` value counts as
/// not supplied.
pub fn validate(pipeline: &PipelineConfig, raw: &RawParams) -> Result<ValidatedParams, ValidationError> {
    if let Some(unknown) = raw.keys().find(|key| pipeline.parameter(key).is_none()) {
        return Err(ValidationError::new(
            unknown,
            ValidationErrorKind::UnknownParameter,
            format!("'{}' does not declare this parameter", pipeline.name),
        ));
    }

    let mut values = BTreeMap::new();
    for spec in &pipeline.parameters {
        let supplied = raw.get(&spec.name).filter(|v| !v.is_null());
        if let Some(value) = validate_parameter(spec, supplied)? {
            values.insert(spec.name.clone(), value);
        }
    }

    Ok(ValidatedParams { values })
}

/// Validates one parameter; `Ok(None)` leaves an optional parameter out
fn validate_parameter(spec: &ParameterSpec, supplied: Option<&JsonValue>) -> Result<Option<JsonValue>, ValidationError> {
    let Some(value) = supplied else {
        return match spec.kind.default_value() {
            Some(default) => Ok(Some(default)),
            None if spec.optional => Ok(None),
            None => Err(ValidationError::new(
                &spec.name,
                ValidationErrorKind::MissingParameter,
                "a value is required",
            )),
        };
    };

    let mismatch = |expected: &str| {
        ValidationError::new(
            &spec.name,
            ValidationErrorKind::TypeMismatch,
            format!("expected {}, got {}", expected, value),
        )
    };

    match &spec.kind {
        ParameterKind::String { default } | ParameterKind::Text { default } => {
            let text = value.as_str().ok_or_else(|| mismatch("a string"))?.trim();
            if text.is_empty() && (default.is_some() || !spec.optional) {
                return Err(ValidationError::new(
                    &spec.name,
                    ValidationErrorKind::EmptyValue,
                    "must not be empty",
                ));
            }
            Ok(Some(JsonValue::String(text.to_string())))
        }
        ParameterKind::Integer { .. } => {
            let number = match value {
                JsonValue::Number(n) => n.as_i64(),
                JsonValue::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            number
                .map(|n| Some(JsonValue::from(n)))
                .ok_or_else(|| mismatch("an integer"))
        }
        ParameterKind::Boolean { .. } => match value {
            JsonValue::Bool(b) => Ok(Some(JsonValue::Bool(*b))),
            JsonValue::String(s) if s == "true" => Ok(Some(JsonValue::Bool(true))),
            JsonValue::String(s) if s == "false" => Ok(Some(JsonValue::Bool(false))),
            _ => Err(mismatch("true or false")),
        },
        ParameterKind::Select {
            options, multiple, ..
        } => {
            let chosen = select_values(spec, options, value)?;
            if chosen.is_empty() {
                return Err(ValidationError::new(
                    &spec.name,
                    ValidationErrorKind::EmptyValue,
                    "choose at least one option",
                ));
            }
            if !multiple && chosen.len() > 1 {
                return Err(ValidationError::new(
                    &spec.name,
                    ValidationErrorKind::MultiplicityViolation,
                    format!("exactly one value accepted, got {}", chosen.len()),
                ));
            }
            if let Some(invalid) = chosen.iter().find(|c| !options.contains(c)) {
                return Err(ValidationError::new(
                    &spec.name,
                    ValidationErrorKind::InvalidOption,
                    format!("'{}' is not one of [{}]", invalid, options.join(", ")),
                ));
            }

            if *multiple {
                Ok(Some(JsonValue::Array(
                    chosen.into_iter().map(JsonValue::String).collect(),
                )))
            } else {
                Ok(chosen.into_iter().next().map(JsonValue::String))
            }
        }
    }
}

/// Values chosen for a select, in order and without repeats
///
/// Strings may carry a comma separated list unless the whole string is itself
/// one of the options.
fn select_values(spec: &ParameterSpec, options: &[String], value: &JsonValue) -> Result<Vec<String>, ValidationError> {
    let raw: Vec<String> = match value {
        JsonValue::String(s) if options.iter().any(|o| o == s.trim()) => vec![s.trim().to_string()],
        JsonValue::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    ValidationError::new(
                        &spec.name,
                        ValidationErrorKind::TypeMismatch,
                        format!("expected option names, got {}", item),
                    )
                })
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(ValidationError::new(
                &spec.name,
                ValidationErrorKind::TypeMismatch,
                format!("expected an option, got {}", other),
            ));
        }
    };

    let mut chosen: Vec<String> = Vec::with_capacity(raw.len());
    for value in raw {
        if !chosen.contains(&value) {
            chosen.push(value);
        }
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use stepdeck_core::domain::pipeline::OutputLocation;

    fn spec(name: &str, optional: bool, kind: ParameterKind) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            description: String::new(),
            optional,
            kind,
        }
    }

    fn options(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn reviews() -> PipelineConfig {
        PipelineConfig {
            name: "refactoring-reviews".to_string(),
            display_name: "Refactoring reviews".to_string(),
            parameters: vec![
                spec("product_ids", false, ParameterKind::String { default: None }),
                spec(
                    "language",
                    false,
                    ParameterKind::Select {
                        options: options(&["en", "fr", "de"]),
                        multiple: false,
                        default: options(&["en"]),
                    },
                ),
                spec(
                    "dialect_localization",
                    false,
                    ParameterKind::Select {
                        options: options(&["skip", "apply"]),
                        multiple: false,
                        default: Vec::new(),
                    },
                ),
                spec("fail", false, ParameterKind::Boolean { default: Some(false) }),
                spec("notes", true, ParameterKind::Text { default: None }),
                spec(
                    "markets",
                    true,
                    ParameterKind::Select {
                        options: options(&["eu", "us", "apac"]),
                        multiple: true,
                        default: Vec::new(),
                    },
                ),
                spec("batch_size", true, ParameterKind::Integer { default: Some(25) }),
            ],
            environments: BTreeMap::new(),
            files: OutputLocation {
                output_directory: "outputs".to_string(),
            },
        }
    }

    fn params(value: JsonValue) -> RawParams {
        serde_json::from_value(value).unwrap()
    }

    fn kind_of(raw: JsonValue) -> ValidationErrorKind {
        validate(&reviews(), &params(raw)).unwrap_err().kind
    }

    #[test]
    fn test_accepts_scenario_parameters() {
        let validated = validate(
            &reviews(),
            &params(json!({
                "product_ids": " 42,17 ",
                "language": "en",
                "dialect_localization": "skip",
                "fail": false
            })),
        )
        .unwrap();

        assert_eq!(validated.get("product_ids"), Some(&json!("42,17")));
        assert_eq!(validated.get("language"), Some(&json!("en")));
        assert_eq!(validated.get("fail"), Some(&json!(false)));
        assert_eq!(validated.get("batch_size"), Some(&json!(25)));
        // Optional parameters without a default are left out
        assert_eq!(validated.get("notes"), None);
        assert_eq!(validated.get("markets"), None);

        let input: JsonValue = serde_json::from_str(&validated.to_input_json()).unwrap();
        assert_eq!(input["dialect_localization"], json!("skip"));
    }

    #[test]
    fn test_unknown_and_missing() {
        assert_eq!(
            kind_of(json!({"product_ids": "1", "dialect_localization": "skip", "colour": "red"})),
            ValidationErrorKind::UnknownParameter
        );
        assert_eq!(
            kind_of(json!({"dialect_localization": "skip"})),
            ValidationErrorKind::MissingParameter
        );
        assert_eq!(
            kind_of(json!({"product_ids": "1", "dialect_localization": null})),
            ValidationErrorKind::MissingParameter
        );
    }

    #[test]
    fn test_select_rules() {
        let base = json!({"product_ids": "1", "dialect_localization": "skip"});
        let with = |key: &str, value: JsonValue| {
            let mut raw = base.clone();
            raw[key] = value;
            raw
        };

        assert_eq!(kind_of(with("language", json!("it"))), ValidationErrorKind::InvalidOption);
        assert_eq!(
            kind_of(with("language", json!("en,fr"))),
            ValidationErrorKind::MultiplicityViolation
        );
        assert_eq!(
            kind_of(with("language", json!(["en", "fr"]))),
            ValidationErrorKind::MultiplicityViolation
        );
        assert_eq!(kind_of(with("language", json!(7))), ValidationErrorKind::TypeMismatch);
        assert_eq!(kind_of(with("language", json!(""))), ValidationErrorKind::EmptyValue);

        let validated = validate(&reviews(), &params(with("markets", json!("eu, us,eu")))).unwrap();
        assert_eq!(validated.get("markets"), Some(&json!(["eu", "us"])));

        let validated = validate(&reviews(), &params(with("language", json!(["fr"])))).unwrap();
        assert_eq!(validated.get("language"), Some(&json!("fr")));
    }

    #[test]
    fn test_boolean_literals() {
        let base = json!({"product_ids": "1", "dialect_localization": "skip"});
        for (value, expected) in [(json!(true), true), (json!("false"), false)] {
            let mut raw = base.clone();
            raw["fail"] = value;
            let validated = validate(&reviews(), &params(raw)).unwrap();
            assert_eq!(validated.get("fail"), Some(&json!(expected)));
        }
        for value in [json!("yes"), json!("True"), json!(1), json!("0")] {
            let mut raw = base.clone();
            raw["fail"] = value;
            assert_eq!(kind_of(raw), ValidationErrorKind::TypeMismatch);
        }
    }

    #[test]
    fn test_string_and_integer_rules() {
        let base = json!({"dialect_localization": "skip"});
        let with = |key: &str, value: JsonValue| {
            let mut raw = base.clone();
            raw["product_ids"] = json!("1");
            raw[key] = value;
            raw
        };

        assert_eq!(kind_of(with("product_ids", json!("   "))), ValidationErrorKind::EmptyValue);
        assert_eq!(kind_of(with("product_ids", json!(42))), ValidationErrorKind::TypeMismatch);
        assert_eq!(kind_of(with("batch_size", json!("ten"))), ValidationErrorKind::TypeMismatch);
        assert_eq!(kind_of(with("batch_size", json!(2.5))), ValidationErrorKind::TypeMismatch);

        // Optional text without a default may be empty
        let validated = validate(&reviews(), &params(with("notes", json!("  ")))).unwrap();
        assert_eq!(validated.get("notes"), Some(&json!("")));

        let validated = validate(&reviews(), &params(with("batch_size", json!(" 40 ")))).unwrap();
        assert_eq!(validated.get("batch_size"), Some(&json!(40)));
    }

    fn select_schema() -> impl Strategy<Value = Vec<(Vec<String>, bool, Option<usize>)>> {
        prop::collection::vec(
            (
                prop::collection::btree_set("[a-z]{1,6}", 1..5),
                any::<bool>(),
                any::<Option<prop::sample::Index>>(),
            )
                .prop_map(|(options, multiple, default)| {
                    let options: Vec<String> = options.into_iter().collect();
                    let default = default.map(|i| i.index(options.len()));
                    (options, multiple, default)
                }),
            1..5,
        )
    }

    fn select_pipeline(schema: &[(Vec<String>, bool, Option<usize>)]) -> PipelineConfig {
        PipelineConfig {
            name: "generated".to_string(),
            display_name: "Generated".to_string(),
            parameters: schema
                .iter()
                .enumerate()
                .map(|(i, (options, multiple, default))| {
                    spec(
                        &format!("p{}", i),
                        false,
                        ParameterKind::Select {
                            options: options.clone(),
                            multiple: *multiple,
                            default: default.map(|d| vec![options[d].clone()]).unwrap_or_default(),
                        },
                    )
                })
                .collect(),
            environments: BTreeMap::new(),
            files: OutputLocation {
                output_directory: "out".to_string(),
            },
        }
    }

    proptest! {
        #[test]
        fn property_defaults_plus_declared_options_are_accepted(
            schema in select_schema(),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 5),
        ) {
            let pipeline = select_pipeline(&schema);
            let mut raw = RawParams::new();
            for (i, (options, _, default)) in schema.iter().enumerate() {
                if default.is_none() {
                    let pick = picks[i].index(options.len());
                    raw.insert(format!("p{}", i), JsonValue::String(options[pick].clone()));
                }
            }

            let validated = validate(&pipeline, &raw);
            prop_assert!(validated.is_ok(), "{:?}", validated);
            prop_assert_eq!(validated.unwrap().as_map().len(), schema.len());
        }

        #[test]
        fn property_undeclared_keys_are_rejected(
            schema in select_schema(),
            extra in "[A-Z][a-z]{0,8}",
        ) {
            let pipeline = select_pipeline(&schema);
            let mut raw = RawParams::new();
            for (i, (options, _, _)) in schema.iter().enumerate() {
                raw.insert(format!("p{}", i), JsonValue::String(options[0].clone()));
            }
            raw.insert(extra.clone(), json!("x"));

            let err = validate(&pipeline, &raw).unwrap_err();
            prop_assert_eq!(err.kind, ValidationErrorKind::UnknownParameter);
            prop_assert_eq!(err.parameter, extra);
        }
    }
}
