//! Lifecycle supervisor for recording workers.
//!
//! Owns the set of running workers keyed by identity. Starting is idempotent;
//! stopping follows a fixed teardown order: close the active stream, signal
//! cancellation, then wait a bounded grace period. Workers that outlive the
//! grace period are still dropped from the running set but kept as orphans
//! so shutdown can abort them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handle::{StopOutcome, WorkerHandle};
use crate::config::settings::DEFAULT_STOP_GRACE;
use crate::config::{Identity, RecorderConfig, ResolvedRecord};
use crate::recorder::{StreamRegistry, WorkerFactory};
use crate::{Error, Result};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a cancelled worker gets to exit.
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

/// Report from [`LifecycleSupervisor::stop_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers running when shutdown began.
    pub total: usize,
    /// Workers that exited within the grace period.
    pub graceful: usize,
    /// Workers that did not exit within the grace period.
    pub timed_out: usize,
    /// Tasks aborted at the end, including earlier orphans.
    pub aborted: usize,
    /// Streams closed cleanly.
    pub streams_closed: usize,
}

impl ShutdownReport {
    pub fn all_graceful(&self) -> bool {
        self.timed_out == 0 && self.aborted == 0
    }
}

/// Owns the running workers and enforces the teardown order.
#[derive(Debug)]
pub struct LifecycleSupervisor {
    factory: WorkerFactory,
    workers: HashMap<Identity, WorkerHandle>,
    /// Workers removed after a stop timeout that may still be running.
    orphans: Vec<WorkerHandle>,
    config: SupervisorConfig,
    /// Parent of every worker token.
    cancellation_token: CancellationToken,
}

impl LifecycleSupervisor {
    pub fn new(factory: WorkerFactory, cancellation_token: CancellationToken) -> Self {
        Self::with_config(factory, cancellation_token, SupervisorConfig::default())
    }

    pub fn with_config(
        factory: WorkerFactory,
        cancellation_token: CancellationToken,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            factory,
            workers: HashMap::new(),
            orphans: Vec::new(),
            config,
            cancellation_token,
        }
    }

    pub fn streams(&self) -> &StreamRegistry {
        self.factory.streams()
    }

    pub fn is_running(&self, identity: &Identity) -> bool {
        self.workers.contains_key(identity)
    }

    /// Identities currently in the running set.
    pub fn running(&self) -> impl Iterator<Item = &Identity> {
        self.workers.keys()
    }

    pub fn running_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_id(&self, identity: &Identity) -> Option<Uuid> {
        self.workers.get(identity).map(WorkerHandle::worker_id)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Start a worker for `record` unless one is already running.
    ///
    /// Returns `Ok(true)` if a worker was started and `Ok(false)` if the
    /// identity was already running. Creation failures are logged and
    /// returned; the running set is left unchanged.
    pub fn start_one(&mut self, config: &Arc<RecorderConfig>, record: &ResolvedRecord) -> Result<bool> {
        let identity = &record.identity;
        if self.workers.contains_key(identity) {
            debug!(%identity, "Worker already running");
            return Ok(false);
        }

        let token = self.cancellation_token.child_token();
        match self.factory.create(config.clone(), record, token) {
            Ok(handle) => {
                info!(%identity, name = %record.name, worker_id = %handle.worker_id(), "Started worker");
                self.workers.insert(identity.clone(), handle);
                Ok(true)
            }
            Err(e) => {
                error!(%identity, "Failed to start worker: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the worker for `identity`, if running.
    ///
    /// The identity leaves the running set even if the worker fails to exit
    /// within the grace period; such workers are kept as orphans.
    pub async fn stop_one(&mut self, identity: &Identity) -> Option<StopOutcome> {
        let Some(mut handle) = self.workers.remove(identity) else {
            debug!(%identity, "Stop requested for a worker that is not running");
            return None;
        };

        let stream_key = identity.stream_key();
        match self.factory.streams().close(&stream_key) {
            Ok(true) => debug!(%identity, %stream_key, "Closed active stream"),
            Ok(false) => warn!(%identity, %stream_key, "No active stream registered"),
            Err(e) => warn!(%identity, "{}", e),
        }

        handle.request_stop();
        let outcome = handle.await_stopped(self.config.stop_grace).await;
        match &outcome {
            StopOutcome::Stopped(exit) => info!(%identity, ?exit, "Stopped worker"),
            StopOutcome::TimedOut => {
                let err = Error::CancellationTimeout {
                    identity: identity.clone(),
                    timeout: self.config.stop_grace,
                };
                warn!("{}", err);
                self.orphans.retain(|h| !h.is_finished());
                self.orphans.push(handle);
            }
        }
        Some(outcome)
    }

    /// Stop every worker: close all streams, signal every worker, wait for
    /// each, then abort whatever is left.
    pub async fn stop_all(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport {
            total: self.workers.len(),
            ..Default::default()
        };
        info!("Stopping {} workers", report.total);

        report.streams_closed = self.factory.streams().close_all();

        for handle in self.workers.values() {
            handle.request_stop();
        }

        let workers: Vec<_> = self.workers.drain().collect();
        for (identity, mut handle) in workers {
            match handle.await_stopped(self.config.stop_grace).await {
                StopOutcome::Stopped(exit) => {
                    debug!(%identity, ?exit, "Worker stopped");
                    report.graceful += 1;
                }
                StopOutcome::TimedOut => {
                    let err = Error::CancellationTimeout {
                        identity,
                        timeout: self.config.stop_grace,
                    };
                    warn!("{}", err);
                    report.timed_out += 1;
                    self.orphans.retain(|h| !h.is_finished());
                    self.orphans.push(handle);
                }
            }
        }

        self.cancellation_token.cancel();
        for orphan in self.orphans.drain(..) {
            if !orphan.is_finished() {
                warn!(identity = %orphan.identity(), "Aborting worker");
                orphan.abort();
                report.aborted += 1;
            }
        }

        info!(
            "Shutdown complete: {} total, {} graceful, {} timed out, {} aborted",
            report.total, report.graceful, report.timed_out, report.aborted
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{
        CloseSignal, PlatformTable, Recorder, RecorderBuilder, RecorderContext, RecorderOutcome,
        RecorderResult, StreamHandle, StreamResource,
    };
    use crate::scheduler::handle::WorkerExit;
    use crate::scheduler::handle::tests::{Cooperative, Stubborn};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;

    /// Records, for each close, whether the worker was already cancelled.
    #[derive(Clone)]
    struct CloseTracker {
        cancel: CancellationToken,
        log: Arc<Mutex<Vec<bool>>>,
    }

    impl StreamResource for CloseTracker {
        fn close(&self) -> io::Result<()> {
            self.log.lock().unwrap().push(self.cancel.is_cancelled());
            Ok(())
        }
    }

    struct Streaming {
        key: String,
        streams: StreamRegistry,
        log: Arc<Mutex<Vec<bool>>>,
    }

    #[async_trait]
    impl Recorder for Streaming {
        async fn run(self: Box<Self>, cancel: CancellationToken) -> RecorderResult {
            let tracker = CloseTracker {
                cancel: cancel.clone(),
                log: self.log.clone(),
            };
            self.streams
                .register(self.key.clone(), StreamHandle::new(tracker, CloseSignal::new()));
            cancel.cancelled().await;
            Ok(RecorderOutcome::Cancelled)
        }
    }

    /// A stream whose close always fails.
    struct Failing;

    impl StreamResource for Failing {
        fn close(&self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe already gone"))
        }
    }

    /// Registers a stream that cannot be closed, then waits for cancellation.
    struct Broken {
        key: String,
        streams: StreamRegistry,
    }

    #[async_trait]
    impl Recorder for Broken {
        async fn run(self: Box<Self>, cancel: CancellationToken) -> RecorderResult {
            self.streams
                .register(self.key.clone(), StreamHandle::new(Failing, CloseSignal::new()));
            cancel.cancelled().await;
            Ok(RecorderOutcome::Cancelled)
        }
    }

    /// Ignores cancellation but finishes on its own after seven seconds.
    struct Slow;

    #[async_trait]
    impl Recorder for Slow {
        async fn run(self: Box<Self>, _cancel: CancellationToken) -> RecorderResult {
            tokio::time::sleep(Duration::from_secs(7)).await;
            Ok(RecorderOutcome::Completed)
        }
    }

    /// Picks a recorder by id prefix: "stubborn" ignores cancellation,
    /// "slow" outlives the grace period then exits, "stream" registers a
    /// tracked stream and "broken" a stream that fails to close.
    struct TestBuilder {
        log: Arc<Mutex<Vec<bool>>>,
    }

    impl RecorderBuilder for TestBuilder {
        fn build(&self, ctx: RecorderContext) -> Result<Box<dyn Recorder>> {
            let id = ctx.record.identity.id();
            if id.starts_with("stubborn") {
                Ok(Box::new(Stubborn))
            } else if id.starts_with("slow") {
                Ok(Box::new(Slow))
            } else if id.starts_with("broken") {
                Ok(Box::new(Broken {
                    key: ctx.record.identity.stream_key(),
                    streams: ctx.streams,
                }))
            } else if id.starts_with("stream") {
                Ok(Box::new(Streaming {
                    key: ctx.record.identity.stream_key(),
                    streams: ctx.streams,
                    log: self.log.clone(),
                }))
            } else {
                Ok(Box::new(Cooperative))
            }
        }
    }

    fn supervisor() -> (LifecycleSupervisor, Arc<Mutex<Vec<bool>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = PlatformTable::uniform(Arc::new(TestBuilder { log: log.clone() }));
        let factory = WorkerFactory::new(table, StreamRegistry::new());
        (
            LifecycleSupervisor::new(factory, CancellationToken::new()),
            log,
        )
    }

    fn record(platform: &str, id: &str) -> ResolvedRecord {
        ResolvedRecord::new(Identity::new(platform, id), id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_one_is_idempotent() {
        let (mut supervisor, _) = supervisor();
        let config = Arc::new(RecorderConfig::default());
        let rec = record("Twitch", "u2");

        assert!(supervisor.start_one(&config, &rec).unwrap());
        let first = supervisor.worker_id(&rec.identity).unwrap();
        assert!(!supervisor.start_one(&config, &rec).unwrap());
        assert_eq!(supervisor.worker_id(&rec.identity), Some(first));
        assert_eq!(supervisor.running_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_leaves_running_set_unchanged() {
        let (mut supervisor, _) = supervisor();
        let config = Arc::new(RecorderConfig::default());

        let err = supervisor
            .start_one(&config, &record("Kick", "x"))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
        assert_eq!(supervisor.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_stream_before_cancelling() {
        let (mut supervisor, log) = supervisor();
        let config = Arc::new(RecorderConfig::default());
        let rec = record("Afreeca", "stream1");
        supervisor.start_one(&config, &rec).unwrap();

        // Let the worker register its stream.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(supervisor.streams().contains("https://play.afreecatv.com/stream1"));

        let outcome = supervisor.stop_one(&rec.identity).await.unwrap();
        assert!(!outcome.is_timed_out());
        assert_eq!(*log.lock().unwrap(), vec![false]);
        assert!(!supervisor.is_running(&rec.identity));
        assert!(supervisor.streams().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_missing_stream_still_stops_worker() {
        let (mut supervisor, _) = supervisor();
        let config = Arc::new(RecorderConfig::default());
        let rec = record("Twitch", "u2");
        supervisor.start_one(&config, &rec).unwrap();

        let outcome = supervisor.stop_one(&rec.identity).await;
        assert!(matches!(outcome, Some(StopOutcome::Stopped(_))));
        assert_eq!(supervisor.running_count(), 0);
        assert!(supervisor.stop_one(&rec.identity).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_orphans_worker() {
        let (mut supervisor, _) = supervisor();
        let config = Arc::new(RecorderConfig::default());
        let rec = record("Twitch", "stubborn");
        supervisor.start_one(&config, &rec).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = supervisor.stop_one(&rec.identity).await.unwrap();
        assert!(outcome.is_timed_out());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(!supervisor.is_running(&rec.identity));
        assert_eq!(supervisor.orphan_count(), 1);

        // A later start for the same identity gets a fresh worker.
        assert!(supervisor.start_one(&config, &rec).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_close_failure_still_stops_worker() {
        let (mut supervisor, _) = supervisor();
        let config = Arc::new(RecorderConfig::default());
        let rec = record("Twitch", "broken");
        supervisor.start_one(&config, &rec).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(supervisor.streams().contains("https://twitch.com/broken"));

        let outcome = supervisor.stop_one(&rec.identity).await.unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped(WorkerExit::Finished(RecorderOutcome::Cancelled))
        );
        assert!(!supervisor.is_running(&rec.identity));
        assert!(supervisor.streams().is_empty());
        assert_eq!(supervisor.orphan_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_orphans_are_pruned() {
        let (mut supervisor, _) = supervisor();
        let config = Arc::new(RecorderConfig::default());
        let first = record("Twitch", "slow1");
        let second = record("Huya", "slow2");

        supervisor.start_one(&config, &first).unwrap();
        assert!(supervisor.stop_one(&first.identity).await.unwrap().is_timed_out());
        assert_eq!(supervisor.orphan_count(), 1);

        // The first orphan exits on its own at the seven second mark.
        tokio::time::sleep(Duration::from_secs(3)).await;

        supervisor.start_one(&config, &second).unwrap();
        assert!(supervisor.stop_one(&second.identity).await.unwrap().is_timed_out());
        assert_eq!(supervisor.orphan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let (mut supervisor, log) = supervisor();
        let config = Arc::new(RecorderConfig::default());
        for rec in [
            record("Afreeca", "stream1"),
            record("Twitch", "u2"),
            record("Huya", "stubborn"),
        ] {
            supervisor.start_one(&config, &rec).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = supervisor.stop_all().await;
        assert_eq!(
            report,
            ShutdownReport {
                total: 3,
                graceful: 2,
                timed_out: 1,
                aborted: 1,
                streams_closed: 1,
            }
        );
        assert!(!report.all_graceful());
        assert_eq!(*log.lock().unwrap(), vec![false]);
        assert_eq!(supervisor.running_count(), 0);
        assert_eq!(supervisor.orphan_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_empty() {
        let (mut supervisor, _) = supervisor();
        let report = supervisor.stop_all().await;
        assert_eq!(report.total, 0);
        assert!(report.all_graceful());
    }
}
