//! Pipeline Configuration Store
//!
//! Loads pipeline definitions from a directory into an immutable [`Catalog`].
//! Bad files are reported one by one and never stop the rest of the directory
//! from loading. [`ConfigStore::reload`] swaps the whole catalog at once.

mod definition;
mod error;
mod store;

pub use definition::{DefinitionFormat, is_state_machine_arn, parse_definition};
pub use error::{ConfigError, ConfigErrorKind};
pub use store::{ConfigStore, load_directory};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stepdeck_core::domain::pipeline::PipelineConfig;

/// One loaded generation of pipeline definitions
#[derive(Debug, Clone)]
pub struct Catalog {
    pipelines: BTreeMap<String, Arc<PipelineConfig>>,
    errors: Vec<ConfigError>,
    loaded_at: DateTime<Utc>,
}

impl Catalog {
    pub fn new(pipelines: Vec<PipelineConfig>, errors: Vec<ConfigError>) -> Self {
        Self {
            pipelines: pipelines
                .into_iter()
                .map(|p| (p.name.clone(), Arc::new(p)))
                .collect(),
            errors,
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn pipeline(&self, name: &str) -> Option<&Arc<PipelineConfig>> {
        self.pipelines.get(name)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Arc<PipelineConfig>> {
        self.pipelines.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    /// Per-file problems found while loading
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Pipelines deployed to `environment`
    pub fn for_environment<'a>(&'a self, environment: &'a str) -> impl Iterator<Item = &'a Arc<PipelineConfig>> + 'a {
        self.pipelines
            .values()
            .filter(move |p| p.target_for(environment).is_some())
    }

    pub fn target_for(&self, pipeline: &str, environment: &str) -> Option<&str> {
        self.pipelines.get(pipeline)?.target_for(environment)
    }

    /// `(pipeline, target)` pairs polled for an environment
    pub fn targets_for(&self, environment: &str) -> Vec<(String, String)> {
        self.for_environment(environment)
            .filter_map(|p| {
                p.target_for(environment)
                    .map(|target| (p.name.clone(), target.to_string()))
            })
            .collect()
    }

    /// Every environment some pipeline is deployed to
    pub fn environments(&self) -> BTreeSet<String> {
        self.pipelines
            .values()
            .flat_map(|p| p.environments.keys().cloned())
            .collect()
    }
}
