//! File-level compilation: read YAML, write JSON atomically.

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::compiler::{FlatDocument, compile_str};
use crate::error::CompileError;

/// Whether the flat file must be regenerated from the hierarchical one.
///
/// True when the YAML exists and the JSON is missing or has an older
/// modification time.
pub fn needs_recompile(yaml_path: &Path, json_path: &Path) -> Result<bool, CompileError> {
    let yaml_meta = match std::fs::metadata(yaml_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(CompileError::io("reading metadata of", yaml_path, e)),
    };
    let json_meta = match std::fs::metadata(json_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(CompileError::io("reading metadata of", json_path, e)),
    };

    let yaml_mtime = yaml_meta
        .modified()
        .map_err(|e| CompileError::io("reading mtime of", yaml_path, e))?;
    let json_mtime = json_meta
        .modified()
        .map_err(|e| CompileError::io("reading mtime of", json_path, e))?;

    Ok(yaml_mtime > json_mtime)
}

/// Compile `yaml_path` and write the result to `json_path`.
///
/// The destination is only replaced once the whole document compiled; the
/// JSON is staged in a temporary file next to it and renamed into place.
pub fn compile_file(yaml_path: &Path, json_path: &Path) -> Result<FlatDocument, CompileError> {
    let text = std::fs::read_to_string(yaml_path)
        .map_err(|e| CompileError::io("reading", yaml_path, e))?;
    let flat = compile_str(&text)?;
    let rendered = flat.to_json_pretty()?;

    let dir = match json_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| CompileError::io("creating temp file in", dir, e))?;
    staged
        .write_all(rendered.as_bytes())
        .and_then(|_| staged.flush())
        .map_err(|e| CompileError::io("writing", staged.path().to_path_buf(), e))?;
    staged
        .persist(json_path)
        .map_err(|e| CompileError::io("replacing", json_path, e.error))?;

    info!(
        yaml = %yaml_path.display(),
        json = %json_path.display(),
        users = flat.users().len(),
        "Compiled YAML config to JSON"
    );
    Ok(flat)
}
