//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::events::ConfigChange;
use crate::Result;

/// Watches the directories holding the config files and forwards relevant
/// changes as [`ConfigChange`] events.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    flat: PathBuf,
    hierarchical: PathBuf,
}

impl ConfigWatcher {
    pub fn new(flat: impl Into<PathBuf>, hierarchical: impl Into<PathBuf>) -> Self {
        Self {
            flat: flat.into(),
            hierarchical: hierarchical.into(),
        }
    }

    /// Map a changed path to the config file it refers to, by file name.
    pub fn classify(&self, path: &Path) -> Option<ConfigChange> {
        let name = path.file_name()?;
        if Some(name) == self.flat.file_name() {
            Some(ConfigChange::Flat)
        } else if Some(name) == self.hierarchical.file_name() {
            Some(ConfigChange::Hierarchical)
        } else {
            None
        }
    }

    /// Start watching on notify's background thread.
    ///
    /// Events stop when the returned watcher is dropped.
    pub fn spawn(self, tx: mpsc::Sender<ConfigChange>) -> Result<RecommendedWatcher> {
        let dirs = self.watch_dirs();
        let classifier = self.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Config watch error: {}", e);
                    return;
                }
            };
            if !(event.kind.is_modify() || event.kind.is_create()) {
                return;
            }

            for change in event.paths.iter().filter_map(|p| classifier.classify(p)) {
                debug!(?change, kind = ?event.kind, "Config file change detected");
                if let Err(e) = tx.try_send(change) {
                    // A full queue already guarantees another pass.
                    warn!("Dropping config change notification: {}", e);
                }
            }
        })?;

        for dir in &dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        info!(
            flat = %self.flat.display(),
            hierarchical = %self.hierarchical.display(),
            "Config watcher started"
        );
        Ok(watcher)
    }

    fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for file in [&self.flat, &self.hierarchical] {
            let dir = match file.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }
}
