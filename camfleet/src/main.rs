use std::path::PathBuf;

use camfleet::Orchestrator;
use camfleet::config::OrchestratorConfig;
use camfleet::logging;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = OrchestratorConfig::load(config_path.as_deref())?;

    let _log_guard = logging::init_logging(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        "camfleet starting"
    );

    let orchestrator = Orchestrator::from_config(&config)?;
    let report = orchestrator.start_all().await;
    match report {
        Ok(report) => info!(
            discovered = report.discovered,
            started = report.started,
            failed = report.failed,
            "Initial start complete"
        ),
        // Discovery may come up later; the discovery tick keeps trying.
        Err(e) => error!("Initial discovery failed: {}", e),
    }

    let scheduler = orchestrator.spawn_scheduler();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let report = orchestrator.stop_all().await;
    scheduler.join().await;

    if report.all_graceful() {
        info!(total = report.total, "All workers stopped gracefully");
    } else {
        warn!(
            total = report.total,
            forced = report.forced,
            "Shutdown finished, {:.0}% graceful",
            report.graceful_percentage()
        );
    }

    Ok(())
}
