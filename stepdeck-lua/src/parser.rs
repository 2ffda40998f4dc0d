//! Definition evaluation
//!
//! Evaluates a Lua definition chunk in the sandbox and converts the returned
//! table into a serde type. No stage scripts or callbacks are ever invoked; the
//! chunk only builds data.

use anyhow::{Context, Result};
use mlua::{LuaSerdeExt, Value};
use serde::de::DeserializeOwned;

use crate::sandbox::create_sandbox;

/// Evaluate a Lua definition and deserialize the table it returns
///
/// # Arguments
/// * `source` - The Lua source code of the definition
/// * `chunk_name` - Name reported in Lua error messages (usually the file name)
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or raises an error
/// - The chunk does not return a table
/// - The table does not match the shape of `T`
///
/// # Example
/// ```no_run
/// use stepdeck_lua::evaluate_definition;
///
/// #[derive(serde::Deserialize)]
/// struct Named {
///     display_name: String,
/// }
///
/// let named: Named = evaluate_definition(
///     r#"return pipeline.define({ display_name = "reviews" })"#,
///     "reviews.lua",
/// )?;
/// assert_eq!(named.display_name, "reviews");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn evaluate_definition<T: DeserializeOwned>(source: &str, chunk_name: &str) -> Result<T> {
    let lua = create_sandbox().context("Failed to create definition sandbox")?;

    let value: Value = lua
        .load(source)
        .set_name(chunk_name)
        .eval()
        .context("Failed to evaluate definition")?;

    if !value.is_table() {
        anyhow::bail!(
            "Definition must return a table, got {}",
            value.type_name()
        );
    }

    lua.from_value(value)
        .context("Definition table has an invalid shape")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Definition {
        display_name: String,
        environments: std::collections::BTreeMap<String, String>,
        parameters: Vec<Parameter>,
    }

    #[derive(Debug, Deserialize)]
    struct Parameter {
        name: String,
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        options: Option<Vec<String>>,
    }

    #[test]
    fn test_evaluate_definition() {
        let source = r#"
            local languages = { "en", "fr", "de" }
            return pipeline.define({
                display_name = "refactoring-reviews",
                environments = {
                    staging = "arn:aws:states:eu-west-1:123456789012:stateMachine:reviews",
                },
                parameters = {
                    pipeline.parameter("product_ids", { type = "string" }),
                    pipeline.parameter("language", { type = "select", options = languages }),
                },
            })
        "#;

        let definition: Definition = evaluate_definition(source, "reviews.lua").unwrap();
        assert_eq!(definition.display_name, "refactoring-reviews");
        assert_eq!(definition.environments.len(), 1);
        assert_eq!(definition.parameters[0].name, "product_ids");
        assert_eq!(definition.parameters[1].kind, "select");
        assert_eq!(
            definition.parameters[1].options.as_deref(),
            Some(&["en".to_string(), "fr".to_string(), "de".to_string()][..])
        );
    }

    #[test]
    fn test_rejects_non_table() {
        let result: Result<serde_json::Value> = evaluate_definition("return 42", "bad.lua");
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("must return a table"));
    }

    #[test]
    fn test_reports_lua_errors() {
        let result: Result<serde_json::Value> =
            evaluate_definition(r#"error("nope")"#, "broken.lua");
        assert!(result.is_err());
    }
}
