//! Health check endpoint.

use crate::engine::Orchestrator;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Orchestrator version.
    pub version: String,
    /// Experiment being run.
    pub experiment: String,
    /// Number of live workers.
    pub live_workers: usize,
    /// Whether the experiment has completed.
    pub completed: bool,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        experiment: orchestrator.experiment().to_string(),
        live_workers: orchestrator.pool().live_count(),
        completed: orchestrator.is_complete(),
        uptime_seconds: uptime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serializes() {
        let status = HealthStatus {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            experiment: "exp-1".to_string(),
            live_workers: 4,
            completed: false,
            uptime_seconds: 3600,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"experiment\":\"exp-1\""));
        assert!(json.contains("\"live_workers\":4"));
    }
}
