//! Health monitoring and supervision for Vigil components.
//!
//! Components prove liveness by writing heartbeat files. The [`Supervisor`]
//! reads them, restarts components that fall silent through a
//! [`ComponentLauncher`], and gives up on components that keep dying.

pub mod error;
pub mod launcher;
pub mod restart;
pub mod supervisor;

pub use error::SupervisorError;
pub use launcher::{ComponentLauncher, ProcessLauncher, TaskFactory, TaskLauncher};
pub use restart::{RestartEvent, RestartTracker};
pub use supervisor::{read_restart_events, ComponentHealth, ComponentStatus, Supervisor, SupervisorSettings};
