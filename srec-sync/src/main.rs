use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use srec_sync::config::{ConfigWatcher, Settings};
use srec_sync::logging;
use srec_sync::recorder::{PlatformTable, StreamRegistry, StreamlinkBuilder, WorkerFactory};
use srec_sync::scheduler::{LifecycleSupervisor, Reconciler, SupervisorConfig};

/// Capacity of the config change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _log_guard = logging::init_logging(&settings.log_dir)?;

    let shutdown = CancellationToken::new();
    let _log_cleanup =
        logging::start_retention_cleanup(settings.log_dir.clone(), shutdown.child_token());

    let table = PlatformTable::uniform(Arc::new(StreamlinkBuilder::new(
        settings.streamlink_path.clone(),
    )));
    for platform in table.missing() {
        warn!(%platform, "No recorder registered for platform");
    }

    // Workers get their own token tree so streams can be closed before
    // cancellation reaches them on shutdown.
    let supervisor = LifecycleSupervisor::with_config(
        WorkerFactory::new(table, StreamRegistry::new()),
        CancellationToken::new(),
        SupervisorConfig {
            stop_grace: settings.stop_grace,
        },
    );
    let mut reconciler = Reconciler::new(supervisor, &settings);

    let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
    let _watcher =
        ConfigWatcher::new(&settings.config_path, &settings.yaml_config_path).spawn(tx)?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping all recorders");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    info!(
        config = %settings.config_path.display(),
        yaml = %settings.yaml_config_path.display(),
        "srec-sync started"
    );

    let report = reconciler.run(rx, shutdown.clone()).await;
    shutdown.cancel();

    if !report.all_graceful() {
        warn!(
            timed_out = report.timed_out,
            aborted = report.aborted,
            "Some recorders did not stop cleanly"
        );
    }
    info!("srec-sync stopped");

    Ok(())
}
