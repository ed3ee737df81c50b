//! testgrid Master
//!
//! The master service orchestrates test runs across the lab: it matches
//! registered tests to idle machines, activates test environments, dispatches
//! steps, and publishes finalized reports.

use std::sync::Arc;

use anyhow::Result;
use testgrid_master::{
    activator::EnvironmentActivator,
    config::Config,
    controller::{EnvironmentController, TestController},
    model::MachineKind,
    pipeline::{DirectorySink, JsonReportTransformer, ReportPipeline},
    ActiveTestStorage, InMemoryContext, MasterWorker, SimulatedActivator,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to TESTGRID_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting testgrid master");
    info!(
        poll_interval = ?config.poll_interval,
        report_dir = %config.report_dir.display(),
        "Configuration loaded"
    );

    // Dev-mode wiring: in-memory persistence and simulated activators for
    // both machine kinds. A production build swaps the context for the
    // database-backed one and the activators for the real drivers.
    let context = Arc::new(InMemoryContext::new());
    let activators: Vec<Arc<dyn EnvironmentActivator>> = vec![
        Arc::new(SimulatedActivator::new(MachineKind::Hyperv)),
        Arc::new(SimulatedActivator::new(MachineKind::Physical)),
    ];

    let environments = Arc::new(EnvironmentController::new(
        activators,
        config.activation_timeout,
    ));
    let storage = Arc::new(ActiveTestStorage::new());
    let pipeline = Arc::new(ReportPipeline::new(
        vec![Box::new(JsonReportTransformer)],
        Box::new(DirectorySink::new(&config.report_dir)),
    ));
    let controller = Arc::new(TestController::new(
        context,
        environments,
        storage,
        pipeline,
        config.package_root.clone(),
    ));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = MasterWorker::new(controller, config.poll_interval);
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    info!("Waiting for worker to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Master worker did not shut down in time");
    }

    info!("Master shutdown complete");
    Ok(())
}
