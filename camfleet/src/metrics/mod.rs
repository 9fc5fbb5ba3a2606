//! Status reporting.

mod health;
mod status;

pub use health::HealthStatus;
pub use status::{OrchestratorStatus, StatusReporter, WorkerStatus};
