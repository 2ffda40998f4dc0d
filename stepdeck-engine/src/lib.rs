//! Stepdeck Engine
//!
//! Everything between the operator and the remote workflow service:
//!
//! - [`catalog`]: the Pipeline Configuration Store, loading YAML and Lua
//!   definitions into a reload-swappable [`Catalog`]
//! - [`validation`]: the Parameter Validator
//! - [`reconciler`] and [`scheduler`]: the merge step and the per-environment
//!   pollers that drive it
//! - [`engine`]: the Reconciliation Engine that owns the pollers and publishes
//!   snapshots
//! - [`dispatcher`]: the Command Dispatcher for start, stop and redrive
//! - [`settings`]: runtime settings read from the environment

pub mod catalog;
pub mod dispatcher;
pub mod engine;
pub mod reconciler;
pub mod scheduler;
pub mod settings;
pub mod validation;

pub use catalog::{Catalog, ConfigError, ConfigErrorKind, ConfigStore};
pub use dispatcher::{CommandDispatcher, DispatchError};
pub use engine::{EngineError, ReconciliationEngine};
pub use settings::{Settings, SettingsError};
pub use validation::{RawParams, ValidatedParams, ValidationError, ValidationErrorKind, validate};
