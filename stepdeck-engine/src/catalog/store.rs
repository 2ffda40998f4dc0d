//! Directory loading and the reloadable store

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::Catalog;
use super::definition::{DefinitionFormat, parse_definition};
use super::error::{ConfigError, ConfigErrorKind};

/// Loads every definition file in `directory`
///
/// Only an unreadable directory is an error. Problems with single files are
/// collected in [`Catalog::errors`]. Files are visited in name order, so when two
/// files define the same pipeline the first one wins.
pub fn load_directory(directory: &Path, known_environments: &[String]) -> Result<Catalog, ConfigError> {
    let entries = std::fs::read_dir(directory).map_err(|e| {
        ConfigError::new(
            directory,
            ConfigErrorKind::Io,
            format!("cannot read configuration directory: {}", e),
        )
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && DefinitionFormat::from_path(path).is_some())
        .collect();
    files.sort();

    let mut pipelines = Vec::new();
    let mut errors = Vec::new();
    let mut names: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut display_names: BTreeMap<String, PathBuf> = BTreeMap::new();

    for file in files {
        let parsed = std::fs::read_to_string(&file)
            .map_err(|e| ConfigError::new(&file, ConfigErrorKind::Io, e.to_string()))
            .and_then(|source| parse_definition(&file, &source, known_environments));

        let pipeline = match parsed {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!("Skipping pipeline definition: {}", e);
                errors.push(e);
                continue;
            }
        };

        let clash = names
            .get(&pipeline.name)
            .map(|first| format!("pipeline '{}' is already defined in {}", pipeline.name, first.display()))
            .or_else(|| {
                display_names.get(&pipeline.display_name).map(|first| {
                    format!(
                        "display name '{}' is already used in {}",
                        pipeline.display_name,
                        first.display()
                    )
                })
            });
        if let Some(message) = clash {
            let e = ConfigError::new(&file, ConfigErrorKind::DuplicateName, message);
            warn!("Skipping pipeline definition: {}", e);
            errors.push(e);
            continue;
        }

        names.insert(pipeline.name.clone(), file.clone());
        display_names.insert(pipeline.display_name.clone(), file);
        pipelines.push(pipeline);
    }

    info!(
        "Loaded {} pipeline(s) from {} ({} rejected)",
        pipelines.len(),
        directory.display(),
        errors.len()
    );

    Ok(Catalog::new(pipelines, errors))
}

/// Owned, reloadable handle to the current catalog
///
/// Readers take an `Arc<Catalog>` and keep a consistent generation for as long
/// as they hold it; a reload publishes a new generation in one step.
#[derive(Debug)]
pub struct ConfigStore {
    directory: PathBuf,
    known_environments: Vec<String>,
    current: watch::Sender<Arc<Catalog>>,
}

impl ConfigStore {
    /// Loads `directory`, which must exist
    pub fn open(directory: impl Into<PathBuf>, known_environments: Vec<String>) -> Result<Self, ConfigError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(ConfigError::new(
                &directory,
                ConfigErrorKind::Io,
                "configuration directory does not exist",
            ));
        }

        let catalog = load_directory(&directory, &known_environments)?;
        let (current, _) = watch::channel(Arc::new(catalog));

        Ok(Self {
            directory,
            known_environments,
            current,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn known_environments(&self) -> &[String] {
        &self.known_environments
    }

    /// The catalog as of now
    pub fn current(&self) -> Arc<Catalog> {
        self.current.borrow().clone()
    }

    /// Notified on every reload
    pub fn subscribe(&self) -> watch::Receiver<Arc<Catalog>> {
        self.current.subscribe()
    }

    /// Re-reads the directory and swaps the catalog
    ///
    /// When the directory itself cannot be read the previous catalog stays in
    /// place and the error is returned.
    pub fn reload(&self) -> Result<Arc<Catalog>, ConfigError> {
        let catalog = Arc::new(load_directory(&self.directory, &self.known_environments)?);
        self.current.send_replace(catalog.clone());
        Ok(catalog)
    }
}
