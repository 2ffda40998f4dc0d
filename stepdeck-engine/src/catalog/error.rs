//! Configuration errors

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// The file parsed but does not describe a valid pipeline
    SchemaViolation,
    /// Another file already defines a pipeline with this name
    DuplicateName,
    /// The file targets an environment the console does not know
    UnknownEnvironment,
    /// The file or directory could not be read
    Io,
    /// The file is not valid YAML or Lua
    Parse,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigErrorKind::SchemaViolation => "schema violation",
            ConfigErrorKind::DuplicateName => "duplicate name",
            ConfigErrorKind::UnknownEnvironment => "unknown environment",
            ConfigErrorKind::Io => "io error",
            ConfigErrorKind::Parse => "parse error",
        })
    }
}

/// A problem with one definition file
///
/// Reported per file; the rest of the directory still loads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {kind}: {message}", file.display())]
pub struct ConfigError {
    pub file: PathBuf,
    pub kind: ConfigErrorKind,
    pub message: String,
}

impl ConfigError {
    pub fn new(file: &Path, kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            kind,
            message: message.into(),
        }
    }

    pub fn schema(file: &Path, message: impl Into<String>) -> Self {
        Self::new(file, ConfigErrorKind::SchemaViolation, message)
    }
}
