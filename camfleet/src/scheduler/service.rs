//! Periodic scheduling.
//!
//! Two independent tasks run until the cancellation token fires:
//!
//! - a fast status tick that only observes the registry and logs a summary
//! - a slow discovery tick that runs a full reconcile pass
//!
//! Each task owns its own timer, so a slow discovery query never delays a
//! status tick and vice versa.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconciler::Reconciler;
use crate::Error;
use crate::config::OrchestratorConfig;
use crate::metrics::{HealthStatus, StatusReporter};

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub status_interval: Duration,
    pub discovery_interval: Duration,
}

impl From<&OrchestratorConfig> for SchedulerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            status_interval: config.status_interval(),
            discovery_interval: config.discovery_interval(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Drives the status and discovery ticks.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    status: StatusReporter,
    config: SchedulerConfig,
    cancellation_token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        status: StatusReporter,
        config: SchedulerConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            status,
            config,
            cancellation_token,
        }
    }

    /// Spawn both ticks onto the runtime.
    pub fn spawn(self) -> SchedulerHandle {
        info!(
            status_interval = ?self.config.status_interval,
            discovery_interval = ?self.config.discovery_interval,
            "Starting scheduler"
        );

        let status_task = tokio::spawn(run_status_loop(
            self.status,
            self.config.status_interval,
            self.cancellation_token.clone(),
        ));
        let discovery_task = tokio::spawn(run_discovery_loop(
            self.reconciler,
            self.config.discovery_interval,
            self.cancellation_token,
        ));

        SchedulerHandle {
            status_task,
            discovery_task,
        }
    }
}

/// Handle to the running scheduler tasks.
pub struct SchedulerHandle {
    status_task: JoinHandle<()>,
    discovery_task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Wait for both ticks to exit after cancellation.
    pub async fn join(self) {
        let (status, discovery) = tokio::join!(self.status_task, self.discovery_task);
        if let Err(e) = status {
            error!("Status task panicked: {}", e);
        }
        if let Err(e) = discovery {
            error!("Discovery task panicked: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status_task.is_finished() && self.discovery_task.is_finished()
    }
}

async fn run_status_loop(status: StatusReporter, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Status tick stopped");
                break;
            }
            _ = ticker.tick() => log_status(&status),
        }
    }
}

fn log_status(status: &StatusReporter) {
    let report = status.get_status();
    match report.health {
        HealthStatus::Healthy | HealthStatus::Unknown => info!(
            active = report.active,
            total = report.total,
            health = %report.health,
            "Fleet status"
        ),
        HealthStatus::Degraded | HealthStatus::Unhealthy => warn!(
            active = report.active,
            total = report.total,
            health = %report.health,
            "Fleet status"
        ),
    }

    for worker in report.workers.iter().filter(|w| w.parked) {
        warn!(
            camera_id = %worker.camera_id,
            restart_count = worker.restart_count,
            last_error = worker.last_error.as_deref().unwrap_or("-"),
            "Worker parked after exhausting retries"
        );
    }
}

async fn run_discovery_loop(reconciler: Arc<Reconciler>, period: Duration, token: CancellationToken) {
    // start_all already covered the first pass.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Discovery tick stopped");
                break;
            }
            _ = ticker.tick() => {
                match reconciler.refresh_cameras().await {
                    Ok(report) => debug!(actions = report.actions(), "Discovery tick complete"),
                    Err(Error::ShuttingDown) => break,
                    // Logged by the reconciler; retried next tick.
                    Err(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use crate::domain::CameraDescriptor;
    use crate::launcher::ScriptedLauncher;
    use crate::scheduler::{SupervisorConfig, WorkerRegistry, WorkerSupervisor};

    #[tokio::test]
    async fn test_discovery_tick_converges_and_stops_on_cancel() {
        let token = CancellationToken::new();
        let registry = WorkerRegistry::new();
        let supervisor = WorkerSupervisor::new(
            registry.clone(),
            Arc::new(ScriptedLauncher::new()),
            SupervisorConfig::default(),
            token.clone(),
        );
        let discovery = Arc::new(StaticDiscovery::new(vec![CameraDescriptor::new(
            "cam-1", "rtsp://a",
        )]));
        let reconciler = Arc::new(Reconciler::new(supervisor, discovery.clone()));

        let handle = Scheduler::new(
            reconciler,
            StatusReporter::new(registry.clone()),
            SchedulerConfig {
                status_interval: Duration::from_millis(10),
                discovery_interval: Duration::from_millis(20),
            },
            token.clone(),
        )
        .spawn();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.contains("cam-1") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        discovery.set_cameras(Vec::new());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }
}
