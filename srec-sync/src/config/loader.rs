//! Flat configuration loading from disk.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::model::RecorderConfig;
use crate::{Error, Result};

/// Read and validate the flat configuration file.
///
/// Performs no merging: the file is expected to already be in flat form,
/// either hand-written or produced by the config compiler.
pub async fn load_config(path: &Path) -> Result<RecorderConfig> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let config = parse_config(path, &text)?;
    debug!(
        path = %path.display(),
        entries = config.user.len(),
        "Loaded config file"
    );
    Ok(config)
}

/// Parse flat configuration text; `path` is only used for error context.
pub fn parse_config(path: &Path, text: &str) -> Result<RecorderConfig> {
    let value: Value = serde_json::from_str(text).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(root) = value.as_object() else {
        return Err(Error::schema("document root must be an object"));
    };
    match root.get("user") {
        Some(Value::Array(_)) => {}
        Some(_) => return Err(Error::schema("'user' must be an array")),
        None => return Err(Error::schema("missing required key 'user'")),
    }

    serde_json::from_value(value).map_err(|e| Error::schema(e.to_string()))
}
