//! Keeps live-stream recorders in sync with a hot-reloaded configuration.
//!
//! The flat JSON config lists recording targets. A [`scheduler::Reconciler`]
//! diffs it against the running workers on every change, starting new
//! targets and tearing down removed ones through the
//! [`scheduler::LifecycleSupervisor`]. An optional hierarchical YAML config
//! is compiled into the flat one by the `config-compiler` crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod recorder;
pub mod scheduler;

pub use error::{Error, Result};
