//! Recording workers.
//!
//! A [`Recorder`] captures one stream until it ends or is cancelled. Workers
//! are produced per platform by a [`RecorderBuilder`] registered in the
//! [`PlatformTable`]; the [`WorkerFactory`] turns a resolved config record
//! into a running worker.

pub mod factory;
pub mod platform;
pub mod stream;
pub mod streamlink;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{RecorderConfig, ResolvedRecord};

pub use factory::{PlatformTable, WorkerFactory};
pub use platform::Platform;
pub use stream::{CloseSignal, StreamHandle, StreamRegistry, StreamResource};
pub use streamlink::{StreamlinkBuilder, StreamlinkRecorder};

/// How a recorder finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderOutcome {
    /// The stream ended on its own.
    Completed,
    /// Cancellation was observed or the stream was closed externally.
    Cancelled,
}

/// Error raised by a running recorder.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RecorderError {
    pub message: String,
}

impl RecorderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type RecorderResult = std::result::Result<RecorderOutcome, RecorderError>;

/// A long-running capture task for one target.
#[async_trait]
pub trait Recorder: Send {
    /// Record until the stream ends or `cancel` fires.
    ///
    /// Implementations must stop promptly once `cancel` is triggered.
    async fn run(self: Box<Self>, cancel: CancellationToken) -> RecorderResult;
}

/// Everything a builder gets to construct one worker.
#[derive(Debug, Clone)]
pub struct RecorderContext {
    pub platform: Platform,
    /// The full configuration the record was loaded from.
    pub config: Arc<RecorderConfig>,
    pub record: ResolvedRecord,
    /// Where the worker registers its active stream.
    pub streams: StreamRegistry,
}

/// Constructs workers for one or more platforms.
pub trait RecorderBuilder: Send + Sync {
    fn build(&self, ctx: RecorderContext) -> crate::Result<Box<dyn Recorder>>;
}
