//! Console wiring
//!
//! Builds the pieces a command needs from the settings. Startup failures here
//! (missing definition directory, unresolvable credentials) end the process.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use stepdeck_client::artifacts::ArtifactStore;
use stepdeck_client::secrets::{EnvSecretResolver, FileSecretResolver, SecretResolver};
use stepdeck_client::{ExecutionAdapter, WorkflowClient};
use stepdeck_engine::{CommandDispatcher, ConfigStore, ReconciliationEngine, Settings};
use tracing::{info, warn};

pub struct Console {
    settings: Settings,
    secret_dir: Option<PathBuf>,
}

/// A running engine with its dispatcher
pub struct Session {
    pub dispatcher: CommandDispatcher,
    pub store: Arc<ConfigStore>,
}

impl Session {
    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        self.dispatcher.engine()
    }

    pub async fn shutdown(&self) {
        self.engine().shutdown().await;
    }
}

impl Console {
    pub fn new(settings: Settings, secret_dir: Option<PathBuf>) -> Self {
        Self {
            settings,
            secret_dir,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Loads the pipeline catalog; a missing directory is fatal
    pub fn catalog(&self) -> Result<Arc<ConfigStore>> {
        let store = ConfigStore::open(
            &self.settings.config_dir,
            self.settings.environments.clone(),
        )
        .with_context(|| {
            format!(
                "Failed to open pipeline directory {}",
                self.settings.config_dir.display()
            )
        })?;

        let catalog = store.current();
        for error in catalog.errors() {
            warn!("Skipping definition: {}", error);
        }
        info!(
            "Loaded {} pipeline(s) from {}",
            catalog.len(),
            self.settings.config_dir.display()
        );
        Ok(Arc::new(store))
    }

    /// Workflow client with credentials resolved; resolution failures are fatal
    pub fn adapter(&self) -> Result<ExecutionAdapter> {
        let mut client = WorkflowClient::new(&self.settings.workflow_endpoint);

        if let Some(name) = &self.settings.secret_name {
            let resolver: Box<dyn SecretResolver> = match &self.secret_dir {
                Some(dir) => Box::new(FileSecretResolver::new(dir)),
                None => Box::new(EnvSecretResolver),
            };
            let credentials = resolver
                .resolve(name, &self.settings.secret_key)
                .with_context(|| format!("Failed to resolve credentials from secret {}", name))?;
            client = client.with_credentials(credentials);
            info!("Resolved credentials from secret {}", name);
        }

        Ok(ExecutionAdapter::new(
            Arc::new(client),
            self.settings.retry_policy(),
        ))
    }

    /// Starts the pollers and returns a dispatcher bound to them
    pub fn session(&self) -> Result<Session> {
        let store = self.catalog()?;
        let adapter = self.adapter()?;
        let engine = Arc::new(ReconciliationEngine::start(
            &self.settings,
            store.subscribe(),
            adapter.clone(),
        ));

        let mut dispatcher = CommandDispatcher::new(store.clone(), engine, adapter);
        if let Some(root) = &self.settings.artifact_root {
            let artifacts = ArtifactStore::open(root)
                .with_context(|| format!("Failed to open artifact storage at {}", root))?;
            dispatcher = dispatcher.with_artifacts(artifacts);
        }

        Ok(Session { dispatcher, store })
    }

    pub fn require_environment(&self, environment: &str) -> Result<()> {
        if !self.settings.is_known_environment(environment) {
            bail!(
                "Unknown environment '{}' (known: {})",
                environment,
                self.settings.environments.join(", ")
            );
        }
        Ok(())
    }
}
