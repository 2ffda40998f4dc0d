//! Data Transfer Objects
//!
//! Typed views of the remote workflow service's responses. The client crate
//! produces these; the engine consumes them.

pub mod history;
pub mod remote;
