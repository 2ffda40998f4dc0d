//! Per-environment polling

pub mod poller;

pub use poller::{EnvironmentPoller, Intent, PollerSettings};
