//! Process settings read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default flat config path.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
/// Default hierarchical config path.
pub const DEFAULT_YAML_CONFIG_PATH: &str = "config.yaml";
/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "logs";
/// Default time a removed worker gets to stop after cancellation.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Runtime settings for the recorder sync service.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Flat JSON config consumed by the reconciler.
    pub config_path: PathBuf,
    /// Optional hierarchical YAML config compiled into `config_path`.
    pub yaml_config_path: PathBuf,
    /// Directory for rotated log files.
    pub log_dir: PathBuf,
    /// Debounce window for file change notifications.
    pub debounce: Duration,
    /// Grace period for a cancelled worker to exit.
    pub stop_grace: Duration,
    /// Capture binary used by the default recorder.
    pub streamlink_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            yaml_config_path: PathBuf::from(DEFAULT_YAML_CONFIG_PATH),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            debounce: super::events::DEFAULT_DEBOUNCE_WINDOW,
            stop_grace: DEFAULT_STOP_GRACE,
            streamlink_path: "streamlink".to_string(),
        }
    }
}

impl Settings {
    /// Build settings from `SREC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(v) = lookup("SREC_CONFIG") {
            settings.config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SREC_CONFIG_YAML") {
            settings.yaml_config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SREC_LOG_DIR") {
            settings.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SREC_DEBOUNCE_MS") {
            settings.debounce = Duration::from_millis(parse_number("SREC_DEBOUNCE_MS", &v)?);
        }
        if let Some(v) = lookup("SREC_STOP_GRACE_SECS") {
            settings.stop_grace = Duration::from_secs(parse_number("SREC_STOP_GRACE_SECS", &v)?);
        }
        if let Some(v) = lookup("SREC_STREAMLINK") {
            settings.streamlink_path = v;
        }

        Ok(settings)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{key}={value:?} is not a valid number: {e}")))
}
