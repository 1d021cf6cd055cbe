//! Hierarchical recorder configuration compiler.
//!
//! Turns the three-level YAML document (global → group → user) into the flat
//! JSON document consumed by the recorder reconciler. Settings are inherited
//! narrowest-wins, values that merely repeat what a user would inherit anyway
//! are dropped, and `(platform, id)` pairs must be unique across the whole
//! document.
//!
//! ```ignore
//! let flat = config_compiler::compile_str(yaml_text)?;
//! config_compiler::compile_file("config.yaml", "config.json")?;
//! ```

mod compiler;
mod error;
mod file;

pub use compiler::{FlatDocument, Location, compile, compile_str};
pub use error::CompileError;
pub use file::{compile_file, needs_recompile};

/// Top-level key holding the group sequence.
pub const GROUPS_KEY: &str = "groups";
/// Group-level key holding the user sequence.
pub const USERS_KEY: &str = "users";
/// Flat-document key holding the resolved user records.
pub const USER_KEY: &str = "user";
