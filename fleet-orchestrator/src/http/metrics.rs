//! Prometheus metrics endpoint.

use crate::engine::Orchestrator;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use fleet_types::TestStatus;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Counters are monotonic since startup; row counts are read from the store
/// on every scrape (best effort, omitted if the query fails).
pub async fn metrics_handler(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
) -> impl IntoResponse {
    let m = orchestrator.metrics();
    let pool = orchestrator.pool();
    let stats = pool.stats();

    let mut body = format!(
        r#"# HELP fleet_orchestrator_info Orchestrator information
# TYPE fleet_orchestrator_info gauge
fleet_orchestrator_info{{version="{version}",experiment="{experiment}"}} 1

# HELP fleet_orchestrator_workers_live Number of live workers
# TYPE fleet_orchestrator_workers_live gauge
fleet_orchestrator_workers_live {live}

# HELP fleet_orchestrator_workers_ceiling Concurrency ceiling on live workers
# TYPE fleet_orchestrator_workers_ceiling gauge
fleet_orchestrator_workers_ceiling {ceiling}

# HELP fleet_orchestrator_completed Whether the experiment has completed
# TYPE fleet_orchestrator_completed gauge
fleet_orchestrator_completed {completed}
"#,
        version = env!("CARGO_PKG_VERSION"),
        experiment = orchestrator.experiment(),
        live = pool.live_count(),
        ceiling = pool.ceiling(),
        completed = u8::from(orchestrator.is_complete()),
    );

    let counters: [(&str, &str, &AtomicU64); 14] = [
        ("events_total", "Inbound events parsed", &m.events_total),
        ("dispatches_total", "Test cases dispatched", &m.dispatches_total),
        ("results_total", "Results processed", &m.results_total),
        ("detections_total", "Results reporting DETECTED", &m.detections_total),
        ("timeouts_total", "Timeouts of running workers", &m.timeouts_total),
        ("requeues_total", "Timed-out test cases requeued", &m.requeues_total),
        ("failures_total", "Test cases that exhausted their retries", &m.failures_total),
        ("revives_total", "Workers reset after timing out while launching", &m.revives_total),
        ("retired_total", "Workers destroyed for lack of work", &m.retired_total),
        ("stale_events_total", "Events discarded as stale", &m.stale_events_total),
        ("handler_errors_total", "Failed handlers left for redelivery", &m.handler_errors_total),
        ("launches_total", "Workers launched", &stats.launches_total),
        ("destroys_total", "Workers destroyed", &stats.destroys_total),
        ("resets_total", "Workers reset", &stats.resets_total),
    ];
    for (name, help, value) in counters {
        let _ = write!(
            body,
            "\n# HELP fleet_orchestrator_{name} {help}\n# TYPE fleet_orchestrator_{name} counter\nfleet_orchestrator_{name} {}\n",
            value.load(Ordering::Relaxed)
        );
    }

    match orchestrator
        .store()
        .status_counts(orchestrator.experiment())
        .await
    {
        Ok(counts) => {
            body.push_str(
                "\n# HELP fleet_orchestrator_test_cases Test cases per status\n# TYPE fleet_orchestrator_test_cases gauge\n",
            );
            for (status, count) in [
                (TestStatus::ToStart, counts.to_start),
                (TestStatus::Running, counts.running),
                (TestStatus::Detected, counts.detected),
                (TestStatus::NotDetected, counts.not_detected),
                (TestStatus::Failed, counts.failed),
            ] {
                let _ = writeln!(
                    body,
                    "fleet_orchestrator_test_cases{{status=\"{}\"}} {}",
                    status.as_str(),
                    count
                );
            }
        }
        Err(e) => tracing::warn!("Metrics scrape could not read status counts: {}", e),
    }

    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
