//! Credential resolution
//!
//! The console resolves one named secret into connection credentials when it
//! starts. A failure here is fatal to startup; nothing re-resolves per poll.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Prefix of environment variables holding secret documents
pub const SECRET_ENV_PREFIX: &str = "STEPDECK_SECRET_";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret '{0}' not found")]
    NotFound(String),

    #[error("Secret '{name}' is not a JSON object: {reason}")]
    Malformed { name: String, reason: String },

    #[error("Secret '{name}' has no string field '{key}'")]
    MissingKey { name: String, key: String },

    #[error("Failed to read secret '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved connection credentials
///
/// The token never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Source of secret documents
pub trait SecretResolver: Send + Sync {
    /// Raw JSON document stored under `name`
    fn fetch(&self, name: &str) -> Result<String, SecretError>;

    /// Resolves `name` and extracts the string field `key` as credentials
    fn resolve(&self, name: &str, key: &str) -> Result<Credentials, SecretError> {
        let document = self.fetch(name)?;
        let value: serde_json::Value =
            serde_json::from_str(&document).map_err(|e| SecretError::Malformed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(SecretError::Malformed {
                name: name.to_string(),
                reason: "expected an object".to_string(),
            });
        }

        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(Credentials::new)
            .ok_or_else(|| SecretError::MissingKey {
                name: name.to_string(),
                key: key.to_string(),
            })
    }
}

/// Environment variable name holding the secret `name`
pub fn secret_env_var(name: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", SECRET_ENV_PREFIX, normalized)
}

/// Reads secrets from `STEPDECK_SECRET_<NAME>` environment variables
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn fetch(&self, name: &str) -> Result<String, SecretError> {
        std::env::var(secret_env_var(name)).map_err(|_| SecretError::NotFound(name.to_string()))
    }
}

/// Reads secrets from `<dir>/<name>.json`
#[derive(Debug, Clone)]
pub struct FileSecretResolver {
    dir: PathBuf,
}

impl FileSecretResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SecretResolver for FileSecretResolver {
    fn fetch(&self, name: &str) -> Result<String, SecretError> {
        let path = self.dir.join(format!("{}.json", name));
        std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SecretError::NotFound(name.to_string())
            } else {
                SecretError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }
}
