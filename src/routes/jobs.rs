use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::job::SubmitResponse;
use crate::models::{JobId, JobStatus, JobSummary, NewJobRequest};
use crate::services::orchestrator::MirrorError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MirrorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            MirrorError::UnknownBackend { .. } => StatusCode::BAD_REQUEST,
            MirrorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Job request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// POST /api/v1/jobs: create a mirror job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<NewJobRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), MirrorError> {
    let job_id = state.orchestrator.submit(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Created,
        }),
    ))
}

/// GET /api/v1/jobs: snapshot of every live job.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.orchestrator.snapshot())
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSummary>, StatusCode> {
    state
        .orchestrator
        .job(&JobId::from(job_id))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// DELETE /api/v1/jobs/{job_id}: cancel one job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> StatusCode {
    if state.orchestrator.cancel(&JobId::from(job_id)) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Serialize)]
pub struct CancelAllResponse {
    pub cancelled: Vec<JobId>,
}

/// DELETE /api/v1/jobs: cancel every job.
pub async fn cancel_all(State(state): State<AppState>) -> (StatusCode, Json<CancelAllResponse>) {
    let cancelled = state.orchestrator.cancel_all();
    (StatusCode::ACCEPTED, Json(CancelAllResponse { cancelled }))
}

/// GET /api/v1/status: plain text status board.
pub async fn status_board(State(state): State<AppState>) -> String {
    state.orchestrator.status_text()
}
