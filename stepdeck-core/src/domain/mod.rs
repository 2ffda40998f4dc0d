//! Core domain types
//!
//! This module contains the core domain structures used across Stepdeck crates.
//! Pipelines and their parameter schemas come from the configuration store, while
//! execution records and snapshots are owned by the reconciliation engine and
//! handed out read-only to everything else.

pub mod execution;
pub mod pipeline;
pub mod snapshot;
