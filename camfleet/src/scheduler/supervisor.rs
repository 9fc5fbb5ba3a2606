//! Worker supervisor.
//!
//! The supervisor drives every [`TranscodeWorker`] through its state machine:
//! launching processes, watching them, retrying failures with backoff and
//! stopping them. Each camera is handled independently; a failing launcher
//! call or crashing process for one camera never blocks another.
//!
//! # Generations
//!
//! Launches, exit monitors and retry timers run concurrently with `stop` and
//! `restart`. Every launch attempt and every stop bumps the worker's
//! generation, and each async continuation re-checks the generation it was
//! started for before touching the worker. Stale results are discarded (a
//! stale process handle is terminated).
//!
//! # Shutdown
//!
//! [`WorkerSupervisor::stop_all`] cancels the shutdown token first, so no new
//! retries or launches get scheduled, then stops every worker concurrently
//! within the shutdown timeout and force-kills whatever is left.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::events::{EVENT_CHANNEL_CAPACITY, WorkerEvent};
use super::registry::WorkerRegistry;
use crate::config::OrchestratorConfig;
use crate::domain::{RetryPolicy, TranscodeWorker, WorkerState};
use crate::launcher::{ExitWatcher, ProcessExit, ProcessHandle, ProcessLauncher, StopOutcome, WorkerSpec};
use crate::{Error, Result};

/// Extra time granted on top of the stop timeout for the launcher to
/// force-terminate and confirm.
const TERMINATE_HEADROOM: Duration = Duration::from_secs(5);

/// Poll interval while waiting for in-flight operations to drain at shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub retry: RetryPolicy,
    /// Per-worker termination wait.
    pub stop_timeout: Duration,
    /// Bound for [`WorkerSupervisor::stop_all`].
    pub shutdown_timeout: Duration,
    /// Maximum launches in flight. 0 disables the limit.
    pub max_concurrent_starts: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for SupervisorConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            stop_timeout: config.stop_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            max_concurrent_starts: config.max_concurrent_starts,
        }
    }
}

/// Result of [`WorkerSupervisor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The process was launched and the worker is running.
    Running,
    /// The launch failed; a retry is scheduled or the worker is parked.
    Failed,
    /// The camera already had a worker.
    Skipped,
    /// The worker was stopped or restarted while the launch was in flight.
    Superseded,
}

/// Report from a shutdown operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Workers registered when shutdown began.
    pub total: usize,
    /// Workers whose process acknowledged the stop.
    pub graceful: usize,
    /// Workers that had to be force-terminated.
    pub forced: usize,
}

impl ShutdownReport {
    pub fn all_graceful(&self) -> bool {
        self.forced == 0
    }

    /// Get the percentage of workers that stopped gracefully.
    pub fn graceful_percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.graceful as f64 / self.total as f64) * 100.0
        }
    }
}

/// What `stop` found when it inspected the worker.
enum StopPlan {
    /// Another operation is already stopping the worker.
    InProgress,
    /// The worker was stopped; terminate its process if it had one.
    Terminate(Option<ProcessHandle>),
}

struct SupervisorInner {
    registry: WorkerRegistry,
    launcher: Arc<dyn ProcessLauncher>,
    config: SupervisorConfig,
    launch_permits: Option<Arc<Semaphore>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Supervises all transcode workers. Cheap to clone.
#[derive(Clone)]
pub struct WorkerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl WorkerSupervisor {
    pub fn new(
        registry: WorkerRegistry,
        launcher: Arc<dyn ProcessLauncher>,
        config: SupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let launch_permits = match config.max_concurrent_starts {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        Self {
            inner: Arc::new(SupervisorInner {
                registry,
                launcher,
                config,
                launch_permits,
                event_tx,
                shutdown,
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.inner.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.config.retry
    }

    /// Subscribe to worker lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.inner.event_tx.send(event);
    }

    /// Create a worker for `camera_id` and launch its process.
    ///
    /// Cameras that already have a worker are skipped. Launch errors are
    /// recorded on the worker and retried; they are not returned.
    pub async fn start(&self, camera_id: &str, source_uri: &str) -> Result<StartOutcome> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let generation = self.inner.registry.with_lock(|workers| -> Result<Option<u64>> {
            if workers.contains_key(camera_id) {
                return Ok(None);
            }
            let mut worker = TranscodeWorker::new(camera_id, source_uri);
            let generation = worker.begin_launch(source_uri)?;
            workers.insert(camera_id.to_string(), worker);
            Ok(Some(generation))
        })?;

        let Some(generation) = generation else {
            debug!(camera_id = %camera_id, "Worker already exists, skipping start");
            return Ok(StartOutcome::Skipped);
        };

        info!(camera_id = %camera_id, source_uri = %source_uri, "Starting worker");
        self.emit(WorkerEvent::Starting {
            camera_id: camera_id.to_string(),
            source_uri: source_uri.to_string(),
            attempt: 1,
        });

        Ok(self.launch(camera_id, source_uri, generation).await)
    }

    /// Issue one launch for a worker already moved to `Starting`.
    async fn launch(&self, camera_id: &str, source_uri: &str, generation: u64) -> StartOutcome {
        let permit = match &self.inner.launch_permits {
            Some(permits) => permits.clone().acquire_owned().await.ok(),
            None => None,
        };

        if !self.is_current(camera_id, generation, WorkerState::Starting) {
            return StartOutcome::Superseded;
        }

        let result = self
            .inner
            .launcher
            .launch(&WorkerSpec::new(camera_id, source_uri))
            .await;
        drop(permit);

        match result {
            Ok(handle) => self.record_launch(camera_id, generation, handle).await,
            Err(e) => {
                let message = e.to_string();
                let restart_count = self.inner.registry.with_lock(|workers| {
                    let worker = workers.get_mut(camera_id)?;
                    if worker.generation != generation || worker.state() != WorkerState::Starting {
                        return None;
                    }
                    worker.mark_failed(message.clone()).ok()?;
                    Some(worker.restart_count)
                });

                let Some(restart_count) = restart_count else {
                    debug!(camera_id = %camera_id, "Discarding launch error for superseded attempt: {}", message);
                    return StartOutcome::Superseded;
                };

                warn!(
                    camera_id = %camera_id,
                    restart_count,
                    "Failed to launch transcoder: {}",
                    message
                );
                self.emit(WorkerEvent::Failed {
                    camera_id: camera_id.to_string(),
                    error: message,
                    restart_count,
                });
                self.schedule_retry(camera_id, generation, restart_count);
                StartOutcome::Failed
            }
        }
    }

    /// Store a freshly launched handle, or terminate it if the attempt is stale.
    async fn record_launch(
        &self,
        camera_id: &str,
        generation: u64,
        handle: ProcessHandle,
    ) -> StartOutcome {
        let pid = handle.pid();
        let watcher = handle.exit_watcher();

        let stale = self.inner.registry.with_lock(|workers| {
            let Some(worker) = workers.get_mut(camera_id) else {
                return Some(handle);
            };
            if worker.generation != generation
                || worker.state() != WorkerState::Starting
                || worker.process().is_some()
            {
                return Some(handle);
            }
            if let Err(e) = worker.mark_running(handle) {
                error!(camera_id = %camera_id, "Failed to record running worker: {}", e);
            }
            None
        });

        if let Some(handle) = stale {
            debug!(camera_id = %camera_id, "Launch superseded, terminating stale process");
            self.terminate(camera_id, Some(handle), None).await;
            return StartOutcome::Superseded;
        }

        info!(camera_id = %camera_id, pid = ?pid, "Worker running");
        self.emit(WorkerEvent::Running {
            camera_id: camera_id.to_string(),
            pid,
        });
        self.spawn_monitor(camera_id.to_string(), generation, watcher);
        StartOutcome::Running
    }

    /// Watch a running process and treat any exit we did not request as a failure.
    ///
    /// A process that outlives the stability window clears the worker's
    /// failure count; one that dies earlier keeps backing off.
    fn spawn_monitor(&self, camera_id: String, generation: u64, watcher: ExitWatcher) {
        let this = self.clone();
        let stable_after = self.inner.config.retry.stable_after();
        self.inner.tasks.spawn(async move {
            let exited = watcher.wait();
            tokio::pin!(exited);
            let stable = tokio::time::sleep(stable_after);
            tokio::pin!(stable);
            let mut settled = false;

            let exit = loop {
                tokio::select! {
                    exit = &mut exited => break exit,
                    _ = &mut stable, if !settled => {
                        settled = true;
                        this.mark_stable(&camera_id, generation);
                    }
                    _ = this.inner.shutdown.cancelled() => return,
                }
            };
            this.handle_exit(&camera_id, generation, exit);
        });
    }

    fn mark_stable(&self, camera_id: &str, generation: u64) {
        let cleared = self
            .inner
            .registry
            .update(camera_id, |worker| {
                worker.generation == generation && worker.restart_count > 0 && worker.mark_stable()
            })
            .unwrap_or(false);

        if cleared {
            info!(camera_id = %camera_id, "Worker stable, failure count cleared");
        }
    }

    fn handle_exit(&self, camera_id: &str, generation: u64, exit: ProcessExit) {
        let message = format!("process {}", exit);
        let restart_count = self.inner.registry.with_lock(|workers| {
            let worker = workers.get_mut(camera_id)?;
            if worker.generation != generation || worker.state() != WorkerState::Running {
                return None;
            }
            worker.mark_failed(message.clone()).ok()?;
            Some(worker.restart_count)
        });

        let Some(restart_count) = restart_count else {
            debug!(camera_id = %camera_id, "Process of superseded worker {}", exit);
            return;
        };

        warn!(camera_id = %camera_id, restart_count, "Transcoder {}", exit);
        self.emit(WorkerEvent::Failed {
            camera_id: camera_id.to_string(),
            error: message,
            restart_count,
        });
        self.schedule_retry(camera_id, generation, restart_count);
    }

    /// Schedule the next launch for a failed worker, or park it.
    fn schedule_retry(&self, camera_id: &str, generation: u64, restart_count: u32) {
        if self.is_shutting_down() {
            debug!(camera_id = %camera_id, "Shutdown requested, not scheduling retry");
            return;
        }

        let policy = &self.inner.config.retry;
        if !policy.should_retry(restart_count) {
            let parked = self
                .inner
                .registry
                .update(camera_id, |worker| {
                    if worker.generation == generation && worker.state() == WorkerState::Failed {
                        worker.parked = true;
                    }
                    worker.parked
                })
                .unwrap_or(false);

            if parked {
                warn!(
                    camera_id = %camera_id,
                    restart_count,
                    max_restarts = policy.max_restarts,
                    "Retries exhausted, worker parked until discovery confirms the camera"
                );
                self.emit(WorkerEvent::Parked {
                    camera_id: camera_id.to_string(),
                    restart_count,
                });
            }
            return;
        }

        let delay = policy.delay_for_restart(restart_count);
        debug!(camera_id = %camera_id, restart_count, "Retrying in {:?}", delay);
        self.emit(WorkerEvent::retry_scheduled(camera_id, delay, restart_count));

        let this = self.clone();
        let camera_id = camera_id.to_string();
        self.inner.tasks.spawn(async move {
            tokio::select! {
                _ = this.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            this.retry(&camera_id, generation).await;
        });
    }

    async fn retry(&self, camera_id: &str, expected_generation: u64) {
        let shutting_down = self.is_shutting_down();
        let attempt = self.inner.registry.with_lock(|workers| {
            let worker = workers.get_mut(camera_id)?;
            if shutting_down
                || worker.generation != expected_generation
                || worker.state() != WorkerState::Failed
                || worker.parked
            {
                return None;
            }
            let source_uri = worker.source_uri_snapshot.clone();
            let generation = worker.begin_launch(&source_uri).ok()?;
            Some((source_uri, generation, worker.restart_count))
        });

        let Some((source_uri, generation, restart_count)) = attempt else {
            debug!(camera_id = %camera_id, "Retry no longer applies");
            return;
        };

        info!(camera_id = %camera_id, restart_count, "Retrying worker");
        self.emit(WorkerEvent::Starting {
            camera_id: camera_id.to_string(),
            source_uri: source_uri.clone(),
            attempt: restart_count + 1,
        });
        self.launch(camera_id, &source_uri, generation).await;
    }

    /// Give a parked worker one more attempt without resetting its counter.
    ///
    /// Returns `true` if a launch was issued.
    pub async fn resume_parked(&self, camera_id: &str) -> Result<bool> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let attempt = self.inner.registry.with_lock(|workers| -> Result<Option<(String, u64, u32)>> {
            let Some(worker) = workers.get_mut(camera_id) else {
                return Err(Error::not_found("worker", camera_id));
            };
            if worker.state() != WorkerState::Failed || !worker.parked {
                return Ok(None);
            }
            let source_uri = worker.source_uri_snapshot.clone();
            let generation = worker.begin_launch(&source_uri)?;
            Ok(Some((source_uri, generation, worker.restart_count)))
        })?;

        let Some((source_uri, generation, restart_count)) = attempt else {
            return Ok(false);
        };

        info!(camera_id = %camera_id, restart_count, "Camera still discovered, retrying parked worker");
        self.emit(WorkerEvent::Starting {
            camera_id: camera_id.to_string(),
            source_uri: source_uri.clone(),
            attempt: restart_count + 1,
        });
        self.launch(camera_id, &source_uri, generation).await;
        Ok(true)
    }

    /// Stop a worker and remove it from the registry.
    ///
    /// Returns `None` when another operation was already stopping the worker;
    /// that operation removes it once done.
    pub async fn stop(&self, camera_id: &str) -> Result<Option<StopOutcome>> {
        self.stop_until(camera_id, None).await
    }

    /// [`WorkerSupervisor::stop`], with termination cut off at `deadline`.
    async fn stop_until(
        &self,
        camera_id: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<StopOutcome>> {
        let plan = self.inner.registry.with_lock(|workers| -> Result<StopPlan> {
            let Some(worker) = workers.get_mut(camera_id) else {
                return Err(Error::not_found("worker", camera_id));
            };
            worker.removal_requested = true;
            match worker.state() {
                WorkerState::Stopping => Ok(StopPlan::InProgress),
                WorkerState::Stopped => {
                    workers.remove(camera_id);
                    Ok(StopPlan::Terminate(None))
                }
                _ => Ok(StopPlan::Terminate(worker.begin_stop()?)),
            }
        })?;

        let handle = match plan {
            StopPlan::InProgress => {
                debug!(camera_id = %camera_id, "Worker already stopping");
                return Ok(None);
            }
            StopPlan::Terminate(handle) => handle,
        };

        info!(camera_id = %camera_id, "Stopping worker");
        self.emit(WorkerEvent::Stopping {
            camera_id: camera_id.to_string(),
        });

        let outcome = self.terminate(camera_id, handle, deadline).await;

        self.inner.registry.with_lock(|workers| {
            if let Some(worker) = workers.get_mut(camera_id)
                && worker.state() == WorkerState::Stopping
            {
                let _ = worker.transition(WorkerState::Stopped);
            }
            workers.remove(camera_id);
        });

        info!(camera_id = %camera_id, outcome = ?outcome, "Worker stopped and removed");
        self.emit(WorkerEvent::Stopped {
            camera_id: camera_id.to_string(),
            outcome,
        });
        self.emit(WorkerEvent::Removed {
            camera_id: camera_id.to_string(),
        });
        Ok(Some(outcome))
    }

    /// Restart a worker in place with a new source.
    ///
    /// The worker keeps its registry entry and restart counter. Returns
    /// `false` if the worker was not in a restartable state.
    pub async fn restart(&self, camera_id: &str, new_source_uri: &str) -> Result<bool> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let stopped = self.inner.registry.with_lock(|workers| -> Result<Option<(String, Option<ProcessHandle>)>> {
            let Some(worker) = workers.get_mut(camera_id) else {
                return Err(Error::not_found("worker", camera_id));
            };
            match worker.state() {
                WorkerState::Running | WorkerState::Starting | WorkerState::Failed => {
                    let old_source_uri = worker.source_uri_snapshot.clone();
                    let handle = worker.begin_stop()?;
                    Ok(Some((old_source_uri, handle)))
                }
                WorkerState::Stopping | WorkerState::Stopped => Ok(None),
            }
        })?;

        let Some((old_source_uri, handle)) = stopped else {
            return Ok(false);
        };

        info!(
            camera_id = %camera_id,
            old_source_uri = %old_source_uri,
            new_source_uri = %new_source_uri,
            "Source changed, restarting worker"
        );
        self.emit(WorkerEvent::ConfigChanged {
            camera_id: camera_id.to_string(),
            old_source_uri,
            new_source_uri: new_source_uri.to_string(),
        });
        self.emit(WorkerEvent::Stopping {
            camera_id: camera_id.to_string(),
        });

        let outcome = self.terminate(camera_id, handle, None).await;
        self.emit(WorkerEvent::Stopped {
            camera_id: camera_id.to_string(),
            outcome,
        });

        let shutting_down = self.is_shutting_down();
        let relaunch = self.inner.registry.with_lock(|workers| {
            let worker = workers.get_mut(camera_id)?;
            if worker.state() != WorkerState::Stopping {
                return None;
            }
            if worker.transition(WorkerState::Stopped).is_err() {
                return None;
            }
            if shutting_down || worker.removal_requested {
                workers.remove(camera_id);
                return None;
            }
            let generation = worker.begin_launch(new_source_uri).ok()?;
            Some((generation, worker.restart_count))
        });

        let Some((generation, restart_count)) = relaunch else {
            debug!(camera_id = %camera_id, "Worker removed during restart");
            self.emit(WorkerEvent::Removed {
                camera_id: camera_id.to_string(),
            });
            return Ok(true);
        };

        self.emit(WorkerEvent::Starting {
            camera_id: camera_id.to_string(),
            source_uri: new_source_uri.to_string(),
            attempt: restart_count + 1,
        });
        self.launch(camera_id, new_source_uri, generation).await;
        Ok(true)
    }

    /// Stop every worker within the shutdown timeout.
    ///
    /// Safe to call repeatedly and with an empty registry.
    pub async fn stop_all(&self) -> ShutdownReport {
        self.inner.shutdown.cancel();

        let ids = self.inner.registry.ids();
        let total = ids.len();
        let deadline = Instant::now() + self.inner.config.shutdown_timeout;
        info!("Stopping {} workers", total);

        // Each stop is cut off at the deadline and kills its own process.
        let mut forced = 0;
        let stops = ids.iter().map(|id| self.stop_until(id, Some(deadline)));
        for (id, result) in ids.iter().zip(join_all(stops).await) {
            match result {
                Ok(Some(StopOutcome::Forced)) => forced += 1,
                Ok(_) => {}
                Err(e) => debug!(camera_id = %id, "Stop skipped: {}", e),
            }
        }

        // Restarts in flight remove their own entries once their stop completes.
        let registry = self.inner.registry.clone();
        let drained = tokio::time::timeout_at(deadline, async move {
            while !registry.is_empty() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        if drained.is_err() {
            let leftovers: Vec<TranscodeWorker> = self
                .inner
                .registry
                .with_lock(|workers| workers.drain().map(|(_, worker)| worker).collect());

            for mut worker in leftovers {
                warn!(camera_id = %worker.camera_id(), state = %worker.state(), "Force-removing worker");
                if let Some(handle) = worker.take_process() {
                    handle.force_kill();
                }
                forced += 1;
                self.emit(WorkerEvent::Removed {
                    camera_id: worker.camera_id().to_string(),
                });
            }
        }

        self.inner.tasks.close();
        if tokio::time::timeout(TERMINATE_HEADROOM, self.inner.tasks.wait())
            .await
            .is_err()
        {
            warn!("Background worker tasks did not finish in time");
        }

        let forced = forced.min(total);
        let report = ShutdownReport {
            total,
            graceful: total - forced,
            forced,
        };
        info!(
            "Shutdown complete: {} total, {} graceful, {} forced",
            report.total, report.graceful, report.forced
        );
        report
    }

    /// Terminate a process through the launcher, never waiting unbounded.
    ///
    /// The wait ends at the stop timeout plus headroom, or at `deadline` if
    /// that comes first. A process the launcher could not confirm stopped is
    /// killed through its [`KillSwitch`](crate::launcher::KillSwitch).
    async fn terminate(
        &self,
        camera_id: &str,
        handle: Option<ProcessHandle>,
        deadline: Option<Instant>,
    ) -> StopOutcome {
        let Some(handle) = handle else {
            return StopOutcome::Graceful;
        };

        let kill_switch = handle.kill_switch();
        let now = Instant::now();
        let mut bound = now + self.inner.config.stop_timeout + TERMINATE_HEADROOM;
        if let Some(deadline) = deadline {
            bound = bound.min(deadline);
        }
        let timeout = self
            .inner
            .config
            .stop_timeout
            .min(bound.saturating_duration_since(now));

        match tokio::time::timeout_at(bound, self.inner.launcher.terminate(handle, timeout)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(camera_id = %camera_id, "Termination error: {}", e);
                kill_switch.kill();
                StopOutcome::Forced
            }
            Err(_) => {
                warn!(camera_id = %camera_id, "Launcher did not confirm termination, killing process");
                kill_switch.kill();
                StopOutcome::Forced
            }
        }
    }

    fn is_current(&self, camera_id: &str, generation: u64, state: WorkerState) -> bool {
        self.inner.registry.with_lock(|workers| {
            workers
                .get(camera_id)
                .is_some_and(|worker| worker.generation == generation && worker.state() == state)
        })
    }
}
