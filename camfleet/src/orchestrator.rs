//! Orchestrator facade.
//!
//! Wires discovery, launcher, registry, supervisor and status reporting
//! together and exposes the operations the outside world uses.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::OrchestratorConfig;
use crate::discovery::{self, CameraDiscoveryProvider};
use crate::launcher::{self, ProcessLauncher};
use crate::metrics::{OrchestratorStatus, StatusReporter};
use crate::scheduler::{
    ReconcileReport, Reconciler, Scheduler, SchedulerConfig, SchedulerHandle, ShutdownReport,
    StartAllReport, SupervisorConfig, WorkerEvent, WorkerRegistry, WorkerSupervisor,
};

/// Camera transcoding orchestrator.
pub struct Orchestrator {
    reconciler: Arc<Reconciler>,
    status: StatusReporter,
    scheduler_config: SchedulerConfig,
    cancellation_token: CancellationToken,
}

impl Orchestrator {
    /// Build an orchestrator from explicit collaborators.
    pub fn new(
        config: &OrchestratorConfig,
        discovery: Arc<dyn CameraDiscoveryProvider>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let registry = WorkerRegistry::new();
        let supervisor = WorkerSupervisor::new(
            registry.clone(),
            launcher,
            SupervisorConfig::from(config),
            cancellation_token.clone(),
        );

        Self {
            reconciler: Arc::new(Reconciler::new(supervisor, discovery)),
            status: StatusReporter::new(registry),
            scheduler_config: SchedulerConfig::from(config),
            cancellation_token,
        }
    }

    /// Build an orchestrator with the providers selected by configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let discovery = discovery::from_config(&config.discovery)?;
        let launcher = launcher::from_config(&config.launcher);
        info!(
            discovery = %discovery.name(),
            launcher = %launcher.name(),
            "Orchestrator configured"
        );
        Ok(Self::new(config, discovery, launcher))
    }

    /// Discover cameras and start a worker for each. Idempotent.
    pub async fn start_all(&self) -> Result<StartAllReport> {
        self.reconciler.start_all().await
    }

    /// Stop every worker and refuse further starts. Idempotent.
    pub async fn stop_all(&self) -> ShutdownReport {
        self.reconciler.stop_all().await
    }

    /// Converge workers with a fresh discovery result.
    pub async fn refresh_cameras(&self) -> Result<ReconcileReport> {
        self.reconciler.refresh_cameras().await
    }

    /// Point-in-time status. Never mutates the registry.
    pub fn get_status(&self) -> OrchestratorStatus {
        self.status.get_status()
    }

    /// Subscribe to worker lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.reconciler.supervisor().subscribe()
    }

    /// Start the periodic status and discovery ticks.
    ///
    /// They stop when [`Orchestrator::stop_all`] runs.
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        Scheduler::new(
            self.reconciler.clone(),
            self.status.clone(),
            self.scheduler_config.clone(),
            self.cancellation_token.clone(),
        )
        .spawn()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
