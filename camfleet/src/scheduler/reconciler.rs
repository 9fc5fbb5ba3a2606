//! Inventory reconciliation.
//!
//! Diffs the discovered cameras against a single registry snapshot and drives
//! the supervisor to converge: start new cameras, stop removed ones, restart
//! cameras whose source changed and give parked workers another attempt.
//! Everything else is left alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::supervisor::{ShutdownReport, StartOutcome, WorkerSupervisor};
use crate::discovery::CameraDiscoveryProvider;
use crate::domain::{CameraDescriptor, WorkerSnapshot, WorkerState, desired_cameras};
use crate::{Error, Result};

/// Actions needed to converge the registry with a discovery result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Cameras without a worker.
    pub to_start: Vec<CameraDescriptor>,
    /// Workers whose camera is no longer discovered or enabled.
    pub to_stop: Vec<String>,
    /// Workers whose source changed.
    pub to_restart: Vec<CameraDescriptor>,
    /// Parked workers whose camera is still discovered with the same source.
    pub to_resume: Vec<String>,
    /// Workers left untouched.
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.to_start.is_empty()
            && self.to_stop.is_empty()
            && self.to_restart.is_empty()
            && self.to_resume.is_empty()
    }
}

/// Compute the reconcile plan from a filtered discovery result and a registry
/// snapshot.
///
/// Workers that are mid-stop are neither restarted nor stopped again; the
/// next pass sees the settled state.
pub fn plan(desired: &[CameraDescriptor], workers: &[WorkerSnapshot]) -> ReconcilePlan {
    let by_id: HashMap<&str, &WorkerSnapshot> =
        workers.iter().map(|w| (w.camera_id.as_str(), w)).collect();
    let desired_ids: HashSet<&str> = desired.iter().map(|c| c.id.as_str()).collect();

    let mut plan = ReconcilePlan::default();

    for camera in desired {
        match by_id.get(camera.id.as_str()) {
            None => plan.to_start.push(camera.clone()),
            Some(worker) if worker.state == WorkerState::Stopping => plan.unchanged += 1,
            Some(worker) if worker.source_uri != camera.source_uri => {
                plan.to_restart.push(camera.clone())
            }
            Some(worker) if worker.parked && worker.state == WorkerState::Failed => {
                plan.to_resume.push(camera.id.clone())
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    let mut to_stop: Vec<String> = workers
        .iter()
        .filter(|w| !desired_ids.contains(w.camera_id.as_str()))
        .filter(|w| w.state != WorkerState::Stopping)
        .map(|w| w.camera_id.clone())
        .collect();
    to_stop.sort();
    plan.to_stop = to_stop;

    plan
}

/// Outcome of [`Reconciler::start_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAllReport {
    /// Enabled cameras discovered.
    pub discovered: usize,
    /// Launches issued.
    pub started: usize,
    /// Cameras that already had a worker.
    pub skipped: usize,
    /// Launches that failed on the first attempt.
    pub failed: usize,
}

/// Outcome of [`Reconciler::refresh_cameras`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub discovered: usize,
    pub started: usize,
    pub stopped: usize,
    pub restarted: usize,
    pub resumed: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    /// Number of worker actions taken.
    pub fn actions(&self) -> usize {
        self.started + self.stopped + self.restarted + self.resumed
    }
}

/// Converges the worker registry with the discovered inventory.
pub struct Reconciler {
    supervisor: WorkerSupervisor,
    discovery: Arc<dyn CameraDiscoveryProvider>,
    /// Serializes reconcile passes so two diffs never interleave.
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(supervisor: WorkerSupervisor, discovery: Arc<dyn CameraDiscoveryProvider>) -> Self {
        Self {
            supervisor,
            discovery,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    async fn discover(&self) -> Result<Vec<CameraDescriptor>> {
        let discovered = self.discovery.list_cameras().await.map_err(|e| match e {
            Error::Discovery(_) => e,
            other => Error::discovery(format!("{} provider: {}", self.discovery.name(), other)),
        })?;
        Ok(desired_cameras(discovered))
    }

    /// Discover cameras and start a worker for each one that has none.
    ///
    /// Returns once every launch has been issued; workers may still be
    /// retrying afterwards.
    pub async fn start_all(&self) -> Result<StartAllReport> {
        if self.supervisor.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let _pass = self.pass_lock.lock().await;
        let desired = self.discover().await?;
        info!(provider = %self.discovery.name(), "Starting workers for {} cameras", desired.len());

        let starts = desired
            .iter()
            .map(|camera| self.supervisor.start(&camera.id, &camera.source_uri));
        let results = join_all(starts).await;

        let mut report = StartAllReport {
            discovered: desired.len(),
            ..Default::default()
        };
        for (camera, result) in desired.iter().zip(results) {
            match result {
                Ok(StartOutcome::Running) | Ok(StartOutcome::Superseded) => report.started += 1,
                Ok(StartOutcome::Failed) => {
                    report.started += 1;
                    report.failed += 1;
                }
                Ok(StartOutcome::Skipped) => report.skipped += 1,
                Err(e) => warn!(camera_id = %camera.id, "Start not issued: {}", e),
            }
        }

        info!(
            discovered = report.discovered,
            started = report.started,
            skipped = report.skipped,
            failed = report.failed,
            "Start-all complete"
        );
        Ok(report)
    }

    /// Stop every worker. See [`WorkerSupervisor::stop_all`].
    pub async fn stop_all(&self) -> ShutdownReport {
        self.supervisor.stop_all().await
    }

    /// Re-query discovery and converge the registry.
    ///
    /// A failed discovery query leaves the registry untouched and is returned
    /// as [`Error::Discovery`].
    pub async fn refresh_cameras(&self) -> Result<ReconcileReport> {
        if self.supervisor.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let _pass = self.pass_lock.lock().await;
        let desired = match self.discover().await {
            Ok(desired) => desired,
            Err(e) => {
                warn!(provider = %self.discovery.name(), "Discovery failed, keeping current workers: {}", e);
                return Err(e);
            }
        };

        let plan = plan(&desired, &self.supervisor.registry().snapshot());
        let mut report = ReconcileReport {
            discovered: desired.len(),
            unchanged: plan.unchanged,
            ..Default::default()
        };

        if plan.is_noop() {
            debug!(discovered = report.discovered, "Registry already matches discovery");
            return Ok(report);
        }

        info!(
            start = plan.to_start.len(),
            stop = plan.to_stop.len(),
            restart = plan.to_restart.len(),
            resume = plan.to_resume.len(),
            "Reconciling workers"
        );

        let supervisor = &self.supervisor;
        let starts = join_all(
            plan.to_start
                .iter()
                .map(|camera| supervisor.start(&camera.id, &camera.source_uri)),
        );
        let stops = join_all(plan.to_stop.iter().map(|id| supervisor.stop(id)));
        let restarts = join_all(
            plan.to_restart
                .iter()
                .map(|camera| supervisor.restart(&camera.id, &camera.source_uri)),
        );
        let resumes = join_all(plan.to_resume.iter().map(|id| supervisor.resume_parked(id)));

        let (starts, stops, restarts, resumes) = tokio::join!(starts, stops, restarts, resumes);

        for (camera, result) in plan.to_start.iter().zip(starts) {
            match result {
                Ok(StartOutcome::Skipped) => report.unchanged += 1,
                Ok(_) => report.started += 1,
                Err(e) => warn!(camera_id = %camera.id, "Start not issued: {}", e),
            }
        }
        for (id, result) in plan.to_stop.iter().zip(stops) {
            match result {
                Ok(_) => report.stopped += 1,
                Err(e) => debug!(camera_id = %id, "Stop skipped: {}", e),
            }
        }
        for (camera, result) in plan.to_restart.iter().zip(restarts) {
            match result {
                Ok(true) => report.restarted += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => debug!(camera_id = %camera.id, "Restart skipped: {}", e),
            }
        }
        for (id, result) in plan.to_resume.iter().zip(resumes) {
            match result {
                Ok(true) => report.resumed += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => debug!(camera_id = %id, "Resume skipped: {}", e),
            }
        }

        info!(
            started = report.started,
            stopped = report.stopped,
            restarted = report.restarted,
            resumed = report.resumed,
            unchanged = report.unchanged,
            "Reconcile pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, uri: &str, state: WorkerState) -> WorkerSnapshot {
        WorkerSnapshot {
            camera_id: id.to_string(),
            state,
            last_error: None,
            restart_count: 0,
            started_at: None,
            source_uri: uri.to_string(),
            parked: false,
            pid: None,
        }
    }

    #[test]
    fn test_plan_three_way_diff() {
        let desired = vec![
            CameraDescriptor::new("cam-1", "rtsp://a"),
            CameraDescriptor::new("cam-2", "rtsp://b2"),
            CameraDescriptor::new("cam-4", "rtsp://d"),
        ];
        let workers = vec![
            worker("cam-1", "rtsp://a", WorkerState::Running),
            worker("cam-2", "rtsp://b", WorkerState::Running),
            worker("cam-3", "rtsp://c", WorkerState::Failed),
        ];

        let plan = plan(&desired, &workers);
        assert_eq!(plan.to_start, vec![CameraDescriptor::new("cam-4", "rtsp://d")]);
        assert_eq!(plan.to_stop, vec!["cam-3".to_string()]);
        assert_eq!(plan.to_restart, vec![CameraDescriptor::new("cam-2", "rtsp://b2")]);
        assert!(plan.to_resume.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_plan_leaves_failed_worker_alone() {
        let desired = vec![CameraDescriptor::new("cam-1", "rtsp://a")];
        let mut failed = worker("cam-1", "rtsp://a", WorkerState::Failed);
        failed.restart_count = 2;

        let plan = plan(&desired, &[failed]);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_plan_resumes_parked_worker() {
        let desired = vec![CameraDescriptor::new("cam-1", "rtsp://a")];
        let mut parked = worker("cam-1", "rtsp://a", WorkerState::Failed);
        parked.parked = true;

        let plan = plan(&desired, &[parked]);
        assert_eq!(plan.to_resume, vec!["cam-1".to_string()]);
    }

    #[test]
    fn test_plan_skips_stopping_workers() {
        let desired = vec![CameraDescriptor::new("cam-1", "rtsp://new")];
        let workers = vec![
            worker("cam-1", "rtsp://old", WorkerState::Stopping),
            worker("cam-2", "rtsp://b", WorkerState::Stopping),
        ];

        let plan = plan(&desired, &workers);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_plan_empty_discovery_stops_everything() {
        let workers = vec![
            worker("cam-2", "rtsp://b", WorkerState::Starting),
            worker("cam-1", "rtsp://a", WorkerState::Running),
        ];
        let plan = plan(&[], &workers);
        assert_eq!(plan.to_stop, vec!["cam-1".to_string(), "cam-2".to_string()]);
    }

    #[test]
    fn test_reconcile_report_actions() {
        let report = ReconcileReport {
            started: 1,
            stopped: 2,
            restarted: 1,
            ..Default::default()
        };
        assert_eq!(report.actions(), 4);
    }
}
