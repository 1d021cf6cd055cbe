//! Handle to a running worker task.
//!
//! Stopping is two-phase: [`WorkerHandle::request_stop`] signals the worker's
//! cancellation token and returns immediately; [`WorkerHandle::await_stopped`]
//! then waits a bounded time for the task to exit.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Identity;
use crate::recorder::{Recorder, RecorderOutcome, RecorderResult};

/// How a worker task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The recorder returned normally.
    Finished(RecorderOutcome),
    /// The recorder returned an error.
    Failed(String),
    /// The task panicked or was aborted.
    Crashed(String),
}

/// Result of waiting for a worker to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(WorkerExit),
    TimedOut,
}

impl StopOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Owned handle to one running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    identity: Identity,
    /// Distinguishes successive workers for the same identity.
    worker_id: Uuid,
    task: JoinHandle<RecorderResult>,
    cancellation_token: CancellationToken,
    /// Set once the task has been joined.
    exit: Option<WorkerExit>,
}

impl WorkerHandle {
    /// Spawn `recorder` on the runtime, cancellable through `cancellation_token`.
    pub fn spawn(
        identity: Identity,
        recorder: Box<dyn Recorder>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let token = cancellation_token.clone();
        let task = tokio::spawn(async move { recorder.run(token).await });
        Self {
            identity,
            worker_id: Uuid::new_v4(),
            task,
            cancellation_token,
            exit: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn is_finished(&self) -> bool {
        self.exit.is_some() || self.task.is_finished()
    }

    /// Phase one: signal cancellation. Never blocks.
    pub fn request_stop(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Phase two: wait up to `timeout` for the task to exit.
    ///
    /// May be called again after a timeout.
    pub async fn await_stopped(&mut self, timeout: Duration) -> StopOutcome {
        if let Some(exit) = &self.exit {
            return StopOutcome::Stopped(exit.clone());
        }

        let exit = match tokio::time::timeout(timeout, &mut self.task).await {
            Err(_) => return StopOutcome::TimedOut,
            Ok(Ok(Ok(outcome))) => WorkerExit::Finished(outcome),
            Ok(Ok(Err(e))) => WorkerExit::Failed(e.to_string()),
            Ok(Err(join_err)) => WorkerExit::Crashed(join_err.to_string()),
        };
        self.exit = Some(exit.clone());
        StopOutcome::Stopped(exit)
    }

    /// Abort the task outright. Used for workers that ignored cancellation.
    pub fn abort(&self) {
        self.task.abort();
    }
}
