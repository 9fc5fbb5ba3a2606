//! Worker scheduling and supervision.
//!
//! - [`WorkerRegistry`] holds one entry per supervised camera
//! - [`WorkerSupervisor`] owns each worker's lifecycle: launch, monitor,
//!   retry with backoff, stop
//! - [`Reconciler`] diffs discovery against the registry and drives the
//!   supervisor
//! - [`Scheduler`] runs the periodic status and discovery ticks

mod events;
mod reconciler;
mod registry;
mod service;
mod supervisor;

pub use events::{EVENT_CHANNEL_CAPACITY, WorkerEvent};
pub use reconciler::{ReconcilePlan, ReconcileReport, Reconciler, StartAllReport, plan};
pub use registry::WorkerRegistry;
pub use service::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use supervisor::{ShutdownReport, StartOutcome, SupervisorConfig, WorkerSupervisor};
