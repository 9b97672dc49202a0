use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::stage_queue::QueueStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub jobs: usize,
    pub checks: HealthChecks,
    pub queues: Vec<QueueStats>,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub status_listener: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
}

/// GET /health: liveness plus per-stage queue counters.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // The listener owns the receiving end; a closed channel means it stopped
    let listener_up = !state.transport.is_closed();
    let status_code = if listener_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if listener_up {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        jobs: state.orchestrator.job_count(),
        checks: HealthChecks {
            status_listener: ComponentHealth {
                status: if listener_up { "ok" } else { "error" }.to_string(),
            },
        },
        queues: state.orchestrator.queue_stats(),
    };

    (status_code, Json(response))
}
