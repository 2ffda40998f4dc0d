//! Stepdeck Lua Definitions
//!
//! Pipeline definitions may be written in Lua instead of YAML. A Lua definition
//! is a chunk that returns a table; this crate evaluates it in a restricted
//! sandbox and deserializes the result into whatever definition type the caller
//! asks for.
//!
//! It includes:
//! - The restricted sandbox (no I/O, OS access or module loading)
//! - The `pipeline` helper module available to definitions
//! - Evaluation of a definition chunk into a serde type

pub mod parser;
pub mod sandbox;

pub use parser::evaluate_definition;
pub use sandbox::create_sandbox;
