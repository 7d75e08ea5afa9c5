//! HTTP endpoints for the orchestrator.
//!
//! Provides health checks, metrics, the experiment view, and a fabric
//! gateway for workers that do not run in-process.

pub mod health;
mod metrics;
mod topics;

use crate::engine::Orchestrator;
use axum::{
    routing::{get, put},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::storage::StatusCounts;
use fleet_types::TestCase;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/experiment", get(experiment_handler))
        .route(
            "/topics/:topic",
            put(topics::create_handler).delete(topics::delete_handler),
        )
        .route(
            "/topics/:topic/messages",
            get(topics::pull_handler).post(topics::publish_handler),
        )
        .layer(Extension(orchestrator))
}

/// Rows of the experiment for the monitoring view.
#[derive(Debug, Serialize)]
pub struct ExperimentView {
    /// Experiment name.
    pub experiment: String,
    /// Row counts per status.
    pub counts: StatusCounts,
    /// All rows, ordered by id.
    pub test_cases: Vec<TestCase>,
}

async fn experiment_handler(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
) -> Result<Json<ExperimentView>, (axum::http::StatusCode, String)> {
    let store = orchestrator.store();
    let experiment = orchestrator.experiment();

    let (counts, test_cases) = match (
        store.status_counts(experiment).await,
        store.list(experiment).await,
    ) {
        (Ok(counts), Ok(rows)) => (counts, rows),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Experiment view query failed: {}", e);
            return Err((
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ));
        }
    };

    Ok(Json(ExperimentView {
        experiment: experiment.to_string(),
        counts,
        test_cases,
    }))
}
