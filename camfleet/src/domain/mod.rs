//! Domain model: cameras, workers and retry policy.

pub mod camera;
pub mod retry_policy;
pub mod worker;

pub use camera::{CameraDescriptor, desired_cameras};
pub use retry_policy::RetryPolicy;
pub use worker::{TranscodeWorker, WorkerSnapshot, WorkerState};
