//! Configuration: flat document model and loader, process settings, and the
//! change feed that drives hot reload.

pub mod events;
pub mod loader;
pub mod model;
pub mod settings;
pub mod watcher;

pub use events::{ChangeBatch, ConfigChange, DEFAULT_DEBOUNCE_WINDOW, next_batch};
pub use loader::{load_config, parse_config};
pub use model::{DesiredSet, Identity, RecorderConfig, ResolvedRecord};
pub use settings::Settings;
pub use watcher::ConfigWatcher;
