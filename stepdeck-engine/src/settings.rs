//! Runtime settings
//!
//! Polling cadence, remote call bounds and the known environments. Values come
//! from `STEPDECK_*` environment variables with fallbacks to the defaults below;
//! the CLI may override any of them with flags.

use std::path::PathBuf;
use std::time::Duration;
use stepdeck_client::RetryPolicy;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: String, value: String },

    #[error("{0}")]
    Constraint(String),
}

/// Console runtime settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory holding pipeline definition files
    pub config_dir: PathBuf,

    /// Workflow API endpoint (e.g., "http://localhost:8083")
    pub workflow_endpoint: String,

    /// Environments definitions may reference
    pub environments: Vec<String>,

    /// Time between polls of one environment
    pub poll_interval: Duration,

    /// Upper bound of the random delay added to every tick
    pub poll_jitter: Duration,

    /// Ticks a speculative record may wait before it is declared unconfirmed
    pub confirm_ticks: u32,

    /// Records kept per environment
    pub max_records: usize,

    pub list_page_size: u32,
    pub list_max_pages: u32,

    /// Hard deadline of one remote call, retries included
    pub call_deadline: Duration,

    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    /// Secret holding the workflow API credentials, resolved at startup
    pub secret_name: Option<String>,
    pub secret_key: String,

    /// Artifact root (`s3://bucket` or a local directory)
    pub artifact_root: Option<String>,
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, SettingsError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SettingsError::Invalid {
                name: name.to_string(),
                value,
            }),
        _ => Ok(None),
    }
}

fn string_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Splits a comma separated list, dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Creates settings with defaults
    pub fn new(config_dir: impl Into<PathBuf>, workflow_endpoint: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            workflow_endpoint: workflow_endpoint.into(),
            environments: vec![
                "development".to_string(),
                "staging".to_string(),
                "production".to_string(),
            ],
            poll_interval: Duration::from_secs(10),
            poll_jitter: Duration::from_millis(1500),
            confirm_ticks: 6,
            max_records: 200,
            list_page_size: 20,
            list_max_pages: 3,
            call_deadline: Duration::from_secs(8),
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_millis(5000),
            secret_name: None,
            secret_key: "token".to_string(),
            artifact_root: None,
        }
    }

    /// Creates settings from environment variables
    ///
    /// Recognized environment variables:
    /// - STEPDECK_CONFIG_DIR (default: configs)
    /// - STEPDECK_WORKFLOW_ENDPOINT (default: http://localhost:8083)
    /// - STEPDECK_ENVIRONMENTS (comma separated, default: development,staging,production)
    /// - STEPDECK_POLL_INTERVAL (seconds, default: 10)
    /// - STEPDECK_POLL_JITTER_MS (default: 1500)
    /// - STEPDECK_CONFIRM_TICKS (default: 6)
    /// - STEPDECK_MAX_RECORDS (default: 200)
    /// - STEPDECK_LIST_PAGE_SIZE (default: 20)
    /// - STEPDECK_LIST_MAX_PAGES (default: 3)
    /// - STEPDECK_CALL_DEADLINE (seconds, default: 8)
    /// - STEPDECK_RETRY_MAX_ATTEMPTS (default: 5)
    /// - STEPDECK_RETRY_BASE_MS (default: 200)
    /// - STEPDECK_RETRY_MAX_DELAY_MS (default: 5000)
    /// - STEPDECK_SECRET_NAME (optional)
    /// - STEPDECK_SECRET_KEY (default: token)
    /// - STEPDECK_ARTIFACT_ROOT (optional)
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if let Some(dir) = string_var("STEPDECK_CONFIG_DIR") {
            settings.config_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = string_var("STEPDECK_WORKFLOW_ENDPOINT") {
            settings.workflow_endpoint = endpoint;
        }
        if let Some(environments) = string_var("STEPDECK_ENVIRONMENTS") {
            settings.environments = parse_list(&environments);
        }
        if let Some(secs) = parse_var::<u64>("STEPDECK_POLL_INTERVAL")? {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>("STEPDECK_POLL_JITTER_MS")? {
            settings.poll_jitter = Duration::from_millis(ms);
        }
        if let Some(ticks) = parse_var("STEPDECK_CONFIRM_TICKS")? {
            settings.confirm_ticks = ticks;
        }
        if let Some(max) = parse_var("STEPDECK_MAX_RECORDS")? {
            settings.max_records = max;
        }
        if let Some(size) = parse_var("STEPDECK_LIST_PAGE_SIZE")? {
            settings.list_page_size = size;
        }
        if let Some(pages) = parse_var("STEPDECK_LIST_MAX_PAGES")? {
            settings.list_max_pages = pages;
        }
        if let Some(secs) = parse_var::<u64>("STEPDECK_CALL_DEADLINE")? {
            settings.call_deadline = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var("STEPDECK_RETRY_MAX_ATTEMPTS")? {
            settings.retry_max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>("STEPDECK_RETRY_BASE_MS")? {
            settings.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("STEPDECK_RETRY_MAX_DELAY_MS")? {
            settings.retry_max_delay = Duration::from_millis(ms);
        }
        settings.secret_name = string_var("STEPDECK_SECRET_NAME");
        if let Some(key) = string_var("STEPDECK_SECRET_KEY") {
            settings.secret_key = key;
        }
        settings.artifact_root = string_var("STEPDECK_ARTIFACT_ROOT");

        Ok(settings)
    }

    /// Validates the settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        let fail = |message: &str| -> Result<(), SettingsError> {
            Err(SettingsError::Constraint(message.to_string()))
        };

        if !self.workflow_endpoint.starts_with("http://")
            && !self.workflow_endpoint.starts_with("https://")
        {
            return fail("workflow_endpoint must start with http:// or https://");
        }
        if self.environments.is_empty() {
            return fail("at least one environment is required");
        }
        if self.poll_interval.is_zero() {
            return fail("poll_interval must be greater than 0");
        }
        if self.poll_jitter >= self.poll_interval {
            return fail("poll_jitter must be shorter than poll_interval");
        }
        if self.call_deadline.is_zero() {
            return fail("call_deadline must be greater than 0");
        }
        if self.call_deadline >= self.poll_interval {
            return fail("call_deadline must be shorter than poll_interval");
        }
        if self.confirm_ticks == 0 {
            return fail("confirm_ticks must be at least 1");
        }
        if self.max_records == 0 {
            return fail("max_records must be at least 1");
        }
        if !(1..=1000).contains(&self.list_page_size) {
            return fail("list_page_size must be between 1 and 1000");
        }
        if self.list_max_pages == 0 {
            return fail("list_max_pages must be at least 1");
        }
        if self.retry_max_attempts == 0 {
            return fail("retry_max_attempts must be at least 1");
        }

        Ok(())
    }

    /// Retry policy for remote calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_base_delay,
            self.retry_max_delay,
            self.call_deadline,
        )
    }

    pub fn is_known_environment(&self, environment: &str) -> bool {
        self.environments.iter().any(|e| e == environment)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new("configs", "http://localhost:8083")
    }
}
