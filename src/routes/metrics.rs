use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Router serving GET /metrics from the installed recorder.
pub fn router(handle: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .with_state(handle)
}

/// Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for the pipeline metrics.
pub fn describe() {
    metrics::describe_counter!("mirror_jobs_submitted_total", "Mirror jobs accepted");
    metrics::describe_counter!(
        "mirror_jobs_completed_total",
        "Mirror jobs that finished uploading"
    );
    metrics::describe_counter!(
        "mirror_jobs_failed_total",
        "Mirror jobs torn down after a stage error, by stage"
    );
    metrics::describe_counter!(
        "mirror_jobs_cancelled_total",
        "Mirror jobs removed, after errors or on request"
    );
    metrics::describe_gauge!("mirror_stage_active", "Jobs holding a slot, by stage");
    metrics::describe_gauge!("mirror_stage_queued", "Jobs waiting for a slot, by stage");
    metrics::describe_histogram!("mirror_stage_seconds", "Time spent in a stage backend");
}
