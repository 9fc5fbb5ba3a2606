//! camfleet: discovers cameras and supervises one transcoder process per camera.

pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;

pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
