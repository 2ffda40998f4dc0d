//! Definition sandbox
//!
//! Definitions are data, so the sandbox offers pure table, string and math
//! functions plus the `pipeline` helpers. Files, processes, the environment and
//! code loading are out of reach.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Memory ceiling for evaluating a single definition
const MEMORY_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// Base-library globals that load code or reach outside the chunk
const BLOCKED_GLOBALS: &[&str] = &["require", "dofile", "loadfile", "load", "collectgarbage"];

/// Creates the sandbox a definition chunk runs in
///
/// # Example
/// ```no_run
/// use stepdeck_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let target: String = lua
///     .load(r#"return pipeline.state_machine("eu-west-1", "123456789012", "reviews")"#)
///     .eval()?;
/// assert_eq!(target, "arn:aws:states:eu-west-1:123456789012:stateMachine:reviews");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(MEMORY_LIMIT_BYTES)?;

    let globals = lua.globals();
    for name in BLOCKED_GLOBALS {
        globals.set(*name, mlua::Nil)?;
    }

    globals.set("pipeline", pipeline_helpers(&lua)?)?;
    Ok(lua)
}

/// The `pipeline` table
///
/// - `pipeline.define(t)` returns the definition table unchanged
/// - `pipeline.parameter(name, t)` returns `t` with `name` set, for ordered
///   `parameters` lists
/// - `pipeline.state_machine(region, account, name)` builds a target ARN
fn pipeline_helpers(lua: &Lua) -> LuaResult<Table> {
    let helpers = lua.create_table()?;

    helpers.set(
        "define",
        lua.create_function(|_, definition: Table| Ok(definition))?,
    )?;

    helpers.set(
        "parameter",
        lua.create_function(|_, (name, parameter): (String, Table)| {
            parameter.set("name", name)?;
            Ok(parameter)
        })?,
    )?;

    helpers.set(
        "state_machine",
        lua.create_function(|_, (region, account, name): (String, String, String)| {
            Ok(format!(
                "arn:aws:states:{}:{}:stateMachine:{}",
                region, account, name
            ))
        })?,
    )?;

    Ok(helpers)
}
