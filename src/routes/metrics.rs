use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service emits.
pub fn describe() {
    metrics::describe_counter!("match_jobs_submitted_total", "Match jobs recorded by submission");
    metrics::describe_counter!("match_jobs_completed_total", "Match jobs that completed");
    metrics::describe_counter!("match_jobs_failed_total", "Match jobs that failed");
    metrics::describe_counter!(
        "match_jobs_deduplicated_total",
        "Submissions answered with an already running job"
    );
    metrics::describe_counter!(
        "worker_transport_errors_total",
        "Requests to the remote worker that failed in transport"
    );
    metrics::describe_counter!(
        "frame_placeholders_total",
        "Frame requests answered with a placeholder"
    );
    metrics::describe_histogram!(
        "worker_run_seconds",
        metrics::Unit::Seconds,
        "Wall time of local worker processes"
    );
    metrics::describe_gauge!("match_jobs_in_flight", "Jobs currently processing");
}
