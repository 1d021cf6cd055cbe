//! Worker scheduling: handles, the lifecycle supervisor and the config
//! reconciler that drives it.

pub mod handle;
pub mod reconciler;
pub mod supervisor;

pub use handle::{StopOutcome, WorkerExit, WorkerHandle};
pub use reconciler::{ReconcileReport, Reconciler};
pub use supervisor::{LifecycleSupervisor, ShutdownReport, SupervisorConfig};
