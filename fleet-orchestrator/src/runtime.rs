//! Host topic consumer loop.
//!
//! Pulls events off the host topic and hands each to the [`Orchestrator`]
//! on its own task, bounded by a semaphore. A message is acknowledged only
//! when its handler succeeded; otherwise it comes back after the fabric's
//! redelivery delay. The loop ends when the orchestrator signals completion.

use crate::config::FabricConfig;
use crate::engine::Orchestrator;
use crate::error::{FabricError, OrchestratorError, Result};
use crate::fabric::Delivery;
use crate::storage::StatusCounts;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Final row counts of the experiment.
    pub counts: StatusCounts,
    /// Events handled.
    pub events: u64,
    /// Handler failures (each one redelivered).
    pub handler_errors: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Run the experiment until it completes.
///
/// Creates the host topic if needed, starts the orchestrator and consumes
/// events. The host topic is deleted on completion.
pub async fn run(orchestrator: Arc<Orchestrator>, config: &FabricConfig) -> Result<RunSummary> {
    let started = Instant::now();
    let fabric = Arc::clone(orchestrator.fabric());

    match fabric.create_topic(&config.host_topic).await {
        Ok(()) | Err(FabricError::TopicExists(_)) => {}
        Err(e) => return Err(e.into()),
    }
    let mut events = fabric.subscribe(&config.host_topic).await?;
    let mut done = orchestrator.completion();

    orchestrator.start().await?;
    tracing::info!(
        "Consuming {} with {} concurrent handlers",
        config.host_topic,
        config.consumer_concurrency
    );

    let limit = Arc::new(Semaphore::new(config.consumer_concurrency.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        if *done.borrow() {
            break;
        }

        tokio::select! {
            changed = done.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            delivery = events.next() => {
                let Some(delivery) = delivery else {
                    tracing::warn!("Host topic {} was deleted, stopping", config.host_topic);
                    break;
                };
                let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
                    break;
                };
                let orchestrator = Arc::clone(&orchestrator);
                in_flight.spawn(async move {
                    process(&orchestrator, delivery).await;
                    drop(permit);
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Event handler task failed: {}", e);
                }
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Event handler task failed: {}", e);
        }
    }
    drop(events);
    orchestrator.watchdog().shutdown().await;
    fabric.delete_topic(&config.host_topic).await?;

    let counts = orchestrator
        .store()
        .status_counts(orchestrator.experiment())
        .await?;
    let metrics = orchestrator.metrics();
    let summary = RunSummary {
        counts,
        events: metrics.events_total.load(Ordering::Relaxed),
        handler_errors: metrics.handler_errors_total.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    };

    tracing::info!(
        "Experiment {} finished in {:?}: {} detected, {} not detected, {} failed",
        orchestrator.experiment(),
        summary.elapsed,
        counts.detected,
        counts.not_detected,
        counts.failed
    );
    Ok(summary)
}

/// Handle one delivery and settle it.
async fn process(orchestrator: &Orchestrator, delivery: Delivery) {
    let message = delivery.message().clone();

    match orchestrator.handle(&message).await {
        Ok(_) => delivery.ack(),
        Err(OrchestratorError::UnknownWorker(name)) => {
            tracing::debug!("Event from {} arrived before its registration", name);
            delivery.nack();
        }
        Err(e) => {
            orchestrator
                .metrics()
                .handler_errors_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::error!("Event handling failed, leaving it for redelivery: {}", e);
            delivery.nack();
        }
    }
}
