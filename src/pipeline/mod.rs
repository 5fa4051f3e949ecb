//! Pipeline lifecycle: child processes, per-station tasks, health state
//! and the restart policy.

pub mod status;
pub mod supervisor;

pub use status::PipelineStatus;
pub use supervisor::Supervisor;
