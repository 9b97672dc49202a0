use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::StatusEvent;

/// POST /mirrorListener: status event ingress for out-of-process backends.
///
/// Requires a JSON body; the event is handed to the transport and handled
/// after this returns. Unknown job ids are dropped by the orchestrator.
pub async fn receive_status(
    State(state): State<AppState>,
    Json(event): Json<StatusEvent>,
) -> StatusCode {
    tracing::debug!(job_id = %event.job_id, status = %event.status, "Status event received");
    state.transport.send(event);
    StatusCode::OK
}
