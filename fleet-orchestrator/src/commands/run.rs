//! Run the experiment.

use anyhow::{Context, Result};
use fleet_orchestrator::config::Config;
use fleet_orchestrator::fabric::{MemoryFabric, MessagingFabric};
use fleet_orchestrator::pool::{CommandProvider, ComputeProvider, SimulatedFleet};
use fleet_orchestrator::storage::SqliteStore;
use fleet_orchestrator::watchdog::TimerWatchdog;
use fleet_orchestrator::{http, Orchestrator};
use std::sync::Arc;
use std::time::Duration;

/// Run the run command.
pub async fn run(config: Config, simulate: bool) -> Result<()> {
    let store = SqliteStore::new(&config.storage.database)
        .await
        .context("Failed to open test case store")?;

    let fabric: Arc<dyn MessagingFabric> =
        Arc::new(MemoryFabric::new(config.fabric.redelivery_delay()));
    let watchdog = Arc::new(TimerWatchdog::new(
        Arc::clone(&fabric),
        config.fabric.host_topic.clone(),
        config.watchdog.deadline(),
    ));
    let provider: Arc<dyn ComputeProvider> = if simulate {
        tracing::info!("Using the simulated fleet");
        Arc::new(SimulatedFleet::new(
            Arc::clone(&fabric),
            config.fabric.host_topic.clone(),
            Duration::from_millis(config.simulation.boot_delay_ms),
            Duration::from_millis(config.simulation.run_delay_ms),
        ))
    } else {
        Arc::new(CommandProvider::new(config.compute.clone()))
    };

    let orchestrator = Arc::new(Orchestrator::new(
        &config.experiment,
        Arc::new(store),
        fabric,
        watchdog,
        provider,
    ));

    if config.http.enabled {
        http::health::init_start_time();
        let listener = tokio::net::TcpListener::bind(&config.http.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", config.http.bind_address))?;
        tracing::info!("HTTP endpoints on {}", config.http.bind_address);

        let app = http::build_router(Arc::clone(&orchestrator));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server failed: {}", e);
            }
        });
    }

    let summary = tokio::select! {
        summary = fleet_orchestrator::run(Arc::clone(&orchestrator), &config.fabric) => summary?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; running test cases are requeued on the next run");
            return Ok(());
        }
    };

    let counts = summary.counts;
    println!(
        "Experiment {} finished in {:.1}s",
        config.experiment.name,
        summary.elapsed.as_secs_f64()
    );
    println!(
        "  DETECTED: {}  NOT_DETECTED: {}  FAILED: {}",
        counts.detected, counts.not_detected, counts.failed
    );
    println!(
        "  events: {}  handler errors: {}",
        summary.events, summary.handler_errors
    );
    Ok(())
}
