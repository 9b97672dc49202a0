pub mod events;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Status event ingress, job API and health check.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/mirrorListener", post(events::receive_status))
        .route("/api/v1/status", get(jobs::status_board))
        .route(
            "/api/v1/jobs",
            get(jobs::list_jobs)
                .post(jobs::submit_job)
                .delete(jobs::cancel_all),
        )
        .route(
            "/api/v1/jobs/{job_id}",
            get(jobs::get_job).delete(jobs::cancel_job),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(64 * 1024))
}
