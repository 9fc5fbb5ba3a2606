//! Worker lifecycle events.

use std::time::Duration;

use serde::Serialize;

use crate::launcher::StopOutcome;

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events published by the supervisor.
///
/// Sent on a broadcast channel; a send with no subscribers is not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// A launch attempt was issued.
    Starting {
        camera_id: String,
        source_uri: String,
        attempt: u32,
    },
    /// The launch succeeded and the process is live.
    Running { camera_id: String, pid: Option<u32> },
    /// A launch failed or the process exited on its own.
    Failed {
        camera_id: String,
        error: String,
        restart_count: u32,
    },
    /// An automatic retry was scheduled.
    RetryScheduled {
        camera_id: String,
        delay_ms: u64,
        restart_count: u32,
    },
    /// Automatic retries are exhausted.
    Parked {
        camera_id: String,
        restart_count: u32,
    },
    /// The discovered source changed and the worker is being restarted.
    ConfigChanged {
        camera_id: String,
        old_source_uri: String,
        new_source_uri: String,
    },
    /// A stop was issued.
    Stopping { camera_id: String },
    /// The process is gone.
    Stopped {
        camera_id: String,
        outcome: StopOutcome,
    },
    /// The worker entry was removed from the registry.
    Removed { camera_id: String },
}

impl WorkerEvent {
    pub fn camera_id(&self) -> &str {
        match self {
            Self::Starting { camera_id, .. }
            | Self::Running { camera_id, .. }
            | Self::Failed { camera_id, .. }
            | Self::RetryScheduled { camera_id, .. }
            | Self::Parked { camera_id, .. }
            | Self::ConfigChanged { camera_id, .. }
            | Self::Stopping { camera_id }
            | Self::Stopped { camera_id, .. }
            | Self::Removed { camera_id } => camera_id,
        }
    }

    /// Short event name for logs and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Starting { .. } => "starting",
            Self::Running { .. } => "running",
            Self::Failed { .. } => "failed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Parked { .. } => "parked",
            Self::ConfigChanged { .. } => "config_changed",
            Self::Stopping { .. } => "stopping",
            Self::Stopped { .. } => "stopped",
            Self::Removed { .. } => "removed",
        }
    }

    pub(crate) fn retry_scheduled(camera_id: &str, delay: Duration, restart_count: u32) -> Self {
        Self::RetryScheduled {
            camera_id: camera_id.to_string(),
            delay_ms: delay.as_millis() as u64,
            restart_count,
        }
    }
}
