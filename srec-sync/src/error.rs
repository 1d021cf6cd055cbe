//! Application-wide error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::Identity;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("Config file {} is not valid JSON: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config schema: {0}")]
    ConfigSchema(String),

    #[error("Config compilation failed: {0}")]
    Compile(#[from] config_compiler::CompileError),

    #[error("Invalid record at user[{index}]: {reason}")]
    RecordValidation { index: usize, reason: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to create worker for {identity}: {reason}")]
    WorkerCreation { identity: Identity, reason: String },

    #[error("Worker {identity} did not stop within {timeout:?}")]
    CancellationTimeout { identity: Identity, timeout: Duration },

    #[error("Failed to close stream {key}: {reason}")]
    StreamClose { key: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(index: usize, reason: impl Into<String>) -> Self {
        Self::RecordValidation {
            index,
            reason: reason.into(),
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::ConfigSchema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn worker_creation(identity: &Identity, reason: impl Into<String>) -> Self {
        Self::WorkerCreation {
            identity: identity.clone(),
            reason: reason.into(),
        }
    }

    /// Whether this error invalidates a whole configuration pass, as opposed
    /// to a single record.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigParse { .. }
                | Self::ConfigSchema(_)
                | Self::Compile(_)
                | Self::Io(_)
        )
    }
}
