//! Configuration change events and debouncing.
//!
//! Editors tend to produce bursts of notifications for a single save (truncate,
//! write, rename). Changes are therefore folded into a [`ChangeBatch`]: after
//! the first event, everything arriving within the debounce window joins the
//! same batch. Changes that arrive while a pass is running stay queued in the
//! channel and start the next batch.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

/// Default debounce window (100ms).
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Which configuration file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigChange {
    /// The flat JSON file consumed by the reconciler.
    Flat,
    /// The hierarchical YAML file that compiles to the flat one.
    Hierarchical,
}

/// Changes folded together by the debouncer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub flat: bool,
    pub hierarchical: bool,
    /// Raw notifications folded into this batch.
    pub events: usize,
}

impl ChangeBatch {
    pub fn add(&mut self, change: ConfigChange) {
        match change {
            ConfigChange::Flat => self.flat = true,
            ConfigChange::Hierarchical => self.hierarchical = true,
        }
        self.events += 1;
    }
}

/// Wait for the next change and fold every change that arrives within
/// `window` of it into one batch.
///
/// Returns `None` once the channel is closed and drained.
pub async fn next_batch(
    rx: &mut mpsc::Receiver<ConfigChange>,
    window: Duration,
) -> Option<ChangeBatch> {
    let first = rx.recv().await?;
    let mut batch = ChangeBatch::default();
    batch.add(first);

    let deadline = tokio::time::Instant::now() + window;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            change = rx.recv() => match change {
                Some(change) => batch.add(change),
                None => break,
            },
        }
    }

    trace!(?batch, "Debounced config changes");
    Some(batch)
}
