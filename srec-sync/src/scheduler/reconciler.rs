//! Reconciliation of running workers against the configuration.
//!
//! Each pass loads the flat config (compiling it from the hierarchical one
//! first when that is newer), derives the desired set of identities and
//! diffs it against the running set. Passes run strictly one at a time:
//! the change loop only waits for the next batch after the current pass has
//! finished, so later notifications queue up in the channel meanwhile.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handle::StopOutcome;
use super::supervisor::{LifecycleSupervisor, ShutdownReport};
use crate::config::{
    ConfigChange, DesiredSet, Identity, RecorderConfig, ResolvedRecord, Settings, load_config,
    next_batch,
};
use crate::{Error, Result};

/// Delay before every pass, giving writers a moment to finish.
const PASS_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Identities started, in document order.
    pub started: Vec<Identity>,
    /// Identities removed from the running set.
    pub stopped: Vec<Identity>,
    /// Subset of `stopped` that did not exit within the grace period.
    pub timed_out: Vec<Identity>,
    /// Identities whose worker could not be created.
    pub failed: Vec<Identity>,
    /// Size of the running set after the pass.
    pub running: usize,
}

impl ReconcileReport {
    /// Whether the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Drives the supervisor from configuration changes.
#[derive(Debug)]
pub struct Reconciler {
    supervisor: LifecycleSupervisor,
    config_path: PathBuf,
    yaml_config_path: PathBuf,
    debounce: Duration,
    /// Config used by the most recent successful pass.
    current: Option<Arc<RecorderConfig>>,
}

impl Reconciler {
    pub fn new(supervisor: LifecycleSupervisor, settings: &Settings) -> Self {
        Self {
            supervisor,
            config_path: settings.config_path.clone(),
            yaml_config_path: settings.yaml_config_path.clone(),
            debounce: settings.debounce,
            current: None,
        }
    }

    pub fn supervisor(&self) -> &LifecycleSupervisor {
        &self.supervisor
    }

    pub fn current_config(&self) -> Option<&Arc<RecorderConfig>> {
        self.current.as_ref()
    }

    /// Bring the running set in line with `desired`.
    ///
    /// Identities present in both are left untouched, even if their options
    /// changed. New workers receive `config`.
    pub async fn reconcile(
        &mut self,
        config: Arc<RecorderConfig>,
        desired: &DesiredSet,
    ) -> ReconcileReport {
        let to_add: Vec<&ResolvedRecord> = desired
            .records()
            .iter()
            .filter(|r| !self.supervisor.is_running(&r.identity))
            .collect();
        let mut to_remove: Vec<Identity> = self
            .supervisor
            .running()
            .filter(|identity| !desired.contains(identity))
            .cloned()
            .collect();
        to_remove.sort();

        debug!(
            to_add = to_add.len(),
            to_remove = to_remove.len(),
            "Computed config diff"
        );

        let mut report = ReconcileReport::default();

        for record in to_add {
            match self.supervisor.start_one(&config, record) {
                Ok(true) => report.started.push(record.identity.clone()),
                Ok(false) => {}
                Err(_) => report.failed.push(record.identity.clone()),
            }
        }

        for identity in to_remove {
            match self.supervisor.stop_one(&identity).await {
                Some(StopOutcome::TimedOut) => {
                    report.timed_out.push(identity.clone());
                    report.stopped.push(identity);
                }
                Some(StopOutcome::Stopped(_)) => report.stopped.push(identity),
                None => {}
            }
        }

        self.current = Some(config);
        report.running = self.supervisor.running_count();

        if report.is_noop() && report.failed.is_empty() {
            debug!(running = report.running, "Config unchanged");
        } else {
            info!(
                "Reconciled: {} started, {} stopped, {} failed, {} running",
                report.started.len(),
                report.stopped.len(),
                report.failed.len(),
                report.running
            );
        }
        report
    }

    /// Run one full pass from disk.
    ///
    /// On error nothing has been started or stopped.
    pub async fn sync_from_disk(&mut self) -> Result<ReconcileReport> {
        self.sync(false).await
    }

    /// Like [`Self::sync_from_disk`], but with `force_compile` the
    /// hierarchical config (if present) is recompiled regardless of mtimes.
    async fn sync(&mut self, force_compile: bool) -> Result<ReconcileReport> {
        compile_hierarchical(&self.yaml_config_path, &self.config_path, force_compile).await?;

        let config = load_config(&self.config_path).await?;
        let desired = DesiredSet::from_config(&config);
        if desired.rejected() > 0 {
            warn!("{} config entries were skipped", desired.rejected());
        }
        Ok(self.reconcile(Arc::new(config), &desired).await)
    }

    async fn run_pass(&mut self, force_compile: bool) -> Option<ReconcileReport> {
        tokio::time::sleep(PASS_SETTLE_DELAY).await;
        match self.sync(force_compile).await {
            Ok(report) => Some(report),
            Err(e) if e.aborts_pass() => {
                error!(
                    "Config pass aborted, keeping {} running workers: {}",
                    self.supervisor.running_count(),
                    e
                );
                None
            }
            Err(e) => {
                error!("Config pass failed: {}", e);
                None
            }
        }
    }

    /// Run the initial pass, then one pass per debounced change batch until
    /// `shutdown` fires. Stops every worker before returning.
    pub async fn run(
        &mut self,
        mut changes: mpsc::Receiver<ConfigChange>,
        shutdown: CancellationToken,
    ) -> ShutdownReport {
        info!(config = %self.config_path.display(), "Running initial config pass");
        self.run_pass(false).await;

        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reconciler received shutdown signal");
                    break;
                }
                batch = next_batch(&mut changes, self.debounce) => batch,
            };

            match batch {
                Some(batch) => {
                    debug!(?batch, "Config change detected");
                    self.run_pass(batch.hierarchical).await;
                }
                None => {
                    warn!("Config change feed closed, hot reload disabled");
                    shutdown.cancelled().await;
                    break;
                }
            }
        }

        self.supervisor.stop_all().await
    }
}

/// Recompile the flat config when the hierarchical one is newer, or
/// whenever `force` is set and the hierarchical file exists.
async fn compile_hierarchical(yaml: &Path, json: &Path, force: bool) -> Result<()> {
    let yaml = yaml.to_path_buf();
    let json = json.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let stale = config_compiler::needs_recompile(&yaml, &json)?;
        if stale || (force && yaml.is_file()) {
            info!(
                from = %yaml.display(),
                to = %json.display(),
                "Compiling hierarchical config"
            );
            config_compiler::compile_file(&yaml, &json)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::Other(format!("Config compilation task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{
        PlatformTable, Recorder, RecorderBuilder, RecorderContext, StreamRegistry, WorkerFactory,
    };
    use crate::scheduler::handle::tests::Cooperative;
    use serde_json::json;

    struct CooperativeBuilder;

    impl RecorderBuilder for CooperativeBuilder {
        fn build(&self, _ctx: RecorderContext) -> Result<Box<dyn Recorder>> {
            Ok(Box::new(Cooperative))
        }
    }

    fn reconciler(settings: &Settings) -> Reconciler {
        let factory = WorkerFactory::new(
            PlatformTable::uniform(Arc::new(CooperativeBuilder)),
            StreamRegistry::new(),
        );
        Reconciler::new(
            LifecycleSupervisor::new(factory, CancellationToken::new()),
            settings,
        )
    }

    fn desired(users: serde_json::Value) -> (Arc<RecorderConfig>, DesiredSet) {
        let config: RecorderConfig = serde_json::from_value(json!({ "user": users })).unwrap();
        let desired = DesiredSet::from_config(&config);
        (Arc::new(config), desired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_diff() {
        let mut reconciler = reconciler(&Settings::default());

        let (config, set) = desired(json!([
            {"platform": "Afreeca", "id": "u1"},
            {"platform": "Twitch", "id": "u2"},
        ]));
        let report = reconciler.reconcile(config, &set).await;
        assert_eq!(
            report.started,
            vec![Identity::new("Afreeca", "u1"), Identity::new("Twitch", "u2")]
        );
        assert_eq!(report.running, 2);

        let (config, set) = desired(json!([
            {"platform": "Twitch", "id": "u2"},
            {"platform": "Huya", "id": "u3"},
        ]));
        let report = reconciler.reconcile(config, &set).await;
        assert_eq!(report.started, vec![Identity::new("Huya", "u3")]);
        assert_eq!(report.stopped, vec![Identity::new("Afreeca", "u1")]);
        assert!(report.timed_out.is_empty());
        assert_eq!(report.running, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_platform_is_reported_and_skipped() {
        let mut reconciler = reconciler(&Settings::default());
        let (config, set) = desired(json!([
            {"platform": "Kick", "id": "x"},
            {"platform": "Twitch", "id": "u2"},
        ]));

        let report = reconciler.reconcile(config, &set).await;
        assert_eq!(report.failed, vec![Identity::new("Kick", "x")]);
        assert_eq!(report.started, vec![Identity::new("Twitch", "u2")]);
        assert!(!reconciler.supervisor().is_running(&Identity::new("Kick", "x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_from_disk_missing_file_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            config_path: dir.path().join("config.json"),
            yaml_config_path: dir.path().join("config.yaml"),
            ..Default::default()
        };
        let mut reconciler = reconciler(&settings);

        let err = reconciler.sync_from_disk().await.unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
        assert!(reconciler.current_config().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_keeps_running_set() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            config_path: dir.path().join("config.json"),
            yaml_config_path: dir.path().join("config.yaml"),
            ..Default::default()
        };
        let mut reconciler = reconciler(&settings);

        std::fs::write(
            &settings.config_path,
            r#"{"user": [{"platform": "Twitch", "id": "u2"}]}"#,
        )
        .unwrap();
        let report = reconciler.sync_from_disk().await.unwrap();
        assert_eq!(report.running, 1);

        std::fs::write(&settings.config_path, r#"{"user": [{"platform": "Tw"#).unwrap();
        let err = reconciler.sync_from_disk().await.unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert!(reconciler.supervisor().is_running(&Identity::new("Twitch", "u2")));
    }
}
