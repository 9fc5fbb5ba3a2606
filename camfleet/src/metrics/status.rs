//! Point-in-time fleet status.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::health::HealthStatus;
use crate::domain::{WorkerSnapshot, WorkerState};
use crate::scheduler::WorkerRegistry;

/// Per-worker status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub camera_id: String,
    pub state: WorkerState,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub source_uri: String,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since `started_at` while running.
    pub uptime_secs: Option<u64>,
    /// Retries are exhausted.
    pub parked: bool,
}

impl WorkerStatus {
    fn from_snapshot(snapshot: WorkerSnapshot, now: DateTime<Utc>) -> Self {
        let uptime_secs = match (snapshot.state, snapshot.started_at) {
            (WorkerState::Running, Some(started_at)) => {
                Some((now - started_at).num_seconds().max(0) as u64)
            }
            _ => None,
        };

        Self {
            camera_id: snapshot.camera_id,
            state: snapshot.state,
            last_error: snapshot.last_error,
            restart_count: snapshot.restart_count,
            source_uri: snapshot.source_uri,
            started_at: snapshot.started_at,
            uptime_secs,
            parked: snapshot.parked,
        }
    }
}

/// Aggregate status of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Workers in `Running`.
    pub active: usize,
    /// All workers.
    pub total: usize,
    pub health: HealthStatus,
    /// Workers sorted by camera id.
    pub workers: Vec<WorkerStatus>,
    pub generated_at: DateTime<Utc>,
}

impl OrchestratorStatus {
    pub fn worker(&self, camera_id: &str) -> Option<&WorkerStatus> {
        self.workers.iter().find(|w| w.camera_id == camera_id)
    }

    /// Workers whose retries are exhausted.
    pub fn parked(&self) -> impl Iterator<Item = &WorkerStatus> {
        self.workers.iter().filter(|w| w.parked)
    }
}

/// Read-only view over the worker registry.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    registry: WorkerRegistry,
}

impl StatusReporter {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    /// Build the status from one consistent registry snapshot.
    pub fn get_status(&self) -> OrchestratorStatus {
        let snapshot = self.registry.snapshot();
        let health = HealthStatus::classify(&snapshot);
        let now = Utc::now();

        let mut workers: Vec<WorkerStatus> = snapshot
            .into_iter()
            .map(|s| WorkerStatus::from_snapshot(s, now))
            .collect();
        workers.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));

        OrchestratorStatus {
            active: workers
                .iter()
                .filter(|w| w.state == WorkerState::Running)
                .count(),
            total: workers.len(),
            health,
            workers,
            generated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TranscodeWorker;
    use crate::launcher::ProcessHandle;

    fn registry_with(workers: Vec<TranscodeWorker>) -> WorkerRegistry {
        let registry = WorkerRegistry::new();
        registry.with_lock(|map| {
            for worker in workers {
                map.insert(worker.camera_id().to_string(), worker);
            }
        });
        registry
    }

    #[test]
    fn test_empty_registry() {
        let status = StatusReporter::new(WorkerRegistry::new()).get_status();
        assert_eq!(status.active, 0);
        assert_eq!(status.total, 0);
        assert_eq!(status.health, HealthStatus::Unknown);
        assert!(status.workers.is_empty());
    }

    #[test]
    fn test_counts_and_breakdown() {
        let mut running = TranscodeWorker::new("cam-2", "rtsp://b");
        running.begin_launch("rtsp://b").unwrap();
        let (handle, _control) = ProcessHandle::new(Some(1));
        running.mark_running(handle).unwrap();

        let mut failed = TranscodeWorker::new("cam-1", "rtsp://a");
        failed.begin_launch("rtsp://a").unwrap();
        failed.mark_failed("Launch error: refused").unwrap();
        failed.parked = true;

        let status = StatusReporter::new(registry_with(vec![running, failed])).get_status();
        assert_eq!(status.active, 1);
        assert_eq!(status.total, 2);
        assert_eq!(status.health, HealthStatus::Degraded);
        assert_eq!(status.workers[0].camera_id, "cam-1");
        assert_eq!(status.workers[1].camera_id, "cam-2");

        let failed = status.worker("cam-1").unwrap();
        assert_eq!(failed.state, WorkerState::Failed);
        assert_eq!(failed.restart_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("Launch error: refused"));
        assert!(failed.uptime_secs.is_none());
        assert_eq!(status.parked().count(), 1);

        let running = status.worker("cam-2").unwrap();
        assert!(running.started_at.is_some());
        assert!(running.uptime_secs.is_some());
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut worker = TranscodeWorker::new("cam-1", "rtsp://a");
        worker.begin_launch("rtsp://a").unwrap();

        let status = StatusReporter::new(registry_with(vec![worker])).get_status();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["active"], 0);
        assert_eq!(json["total"], 1);
        assert_eq!(json["health"], "unhealthy");
        assert_eq!(json["workers"][0]["cameraId"], "cam-1");
        assert_eq!(json["workers"][0]["state"], "Starting");
        assert_eq!(json["workers"][0]["restartCount"], 0);
        assert!(json["workers"][0]["lastError"].is_null());
    }
}
