use std::path::PathBuf;

use thiserror::Error;

use crate::compiler::Location;

/// Errors produced while compiling a hierarchical document.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("IO error while {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid document structure: {0}")]
    Schema(String),

    #[error(
        "Duplicate user: platform='{platform}', id='{id}' (first at {first}, duplicate at {duplicate})"
    )]
    DuplicateIdentity {
        platform: String,
        id: String,
        first: Location,
        duplicate: Location,
    },

    #[error("Failed to serialize flat document: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CompileError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
