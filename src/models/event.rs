use serde::{Deserialize, Serialize};

use super::job::JobId;
use super::status::JobStatus;

/// A status change travelling through the status transport.
///
/// On the wire: `{"jobId": "...", "status": "download.complete", "detail": "..."}`.
/// `detail` carries a stage's output location on `complete` and the error
/// text on `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusEvent {
    pub fn new(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            detail: None,
        }
    }
}
