//! Fleet health classification.

use serde::{Deserialize, Serialize};

use crate::domain::{WorkerSnapshot, WorkerState};

/// Health status of the worker fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every worker is running.
    Healthy,
    /// Some workers are running, some are not.
    Degraded,
    /// Workers exist but none is running.
    Unhealthy,
    /// Nothing is supervised.
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Classify a set of workers.
    pub fn classify(workers: &[WorkerSnapshot]) -> Self {
        if workers.is_empty() {
            return HealthStatus::Unknown;
        }

        let running = workers
            .iter()
            .filter(|w| w.state == WorkerState::Running)
            .count();

        if running == workers.len() {
            HealthStatus::Healthy
        } else if running == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(state: WorkerState) -> WorkerSnapshot {
        WorkerSnapshot {
            camera_id: "cam".to_string(),
            state,
            last_error: None,
            restart_count: 0,
            started_at: None,
            source_uri: "rtsp://a".to_string(),
            parked: false,
            pid: None,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(HealthStatus::classify(&[]), HealthStatus::Unknown);
        assert_eq!(
            HealthStatus::classify(&[worker(WorkerState::Running), worker(WorkerState::Running)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::classify(&[worker(WorkerState::Running), worker(WorkerState::Failed)]),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::classify(&[worker(WorkerState::Starting), worker(WorkerState::Failed)]),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_display_matches_serde() {
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }
}
