//! Stepdeck Core
//!
//! Core types and abstractions for the Stepdeck operator console.
//!
//! This crate contains:
//! - Domain types: pipelines, parameter schemas, execution records and the
//!   status state machine, reconciliation snapshots
//! - DTOs: typed views of what the remote workflow service returns
//! - Presentation helpers shared by every front end (durations, console links,
//!   execution naming)

pub mod domain;
pub mod dto;
pub mod format;
pub mod naming;
