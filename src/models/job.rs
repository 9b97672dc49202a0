use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::status::{JobStatus, Stage};

/// Opaque identifier of a mirror job. Also the correlation token on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which backends a job uses, and whether the optional stages apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Capabilities {
    /// Name of the registered download backend (e.g. "http").
    #[garde(length(min = 1, max = 64))]
    pub downloader: String,

    /// Name of the registered upload backend (e.g. "local", "s3").
    #[garde(length(min = 1, max = 64))]
    pub uploader: String,

    #[serde(default)]
    #[garde(skip)]
    pub compress: bool,

    #[serde(default)]
    #[garde(skip)]
    pub decompress: bool,
}

impl Capabilities {
    /// Whether the job passes through `stage` at all.
    pub fn requires(&self, stage: Stage) -> bool {
        match stage {
            Stage::Download | Stage::Upload => true,
            Stage::Compression => self.compress,
            Stage::Decompression => self.decompress,
        }
    }
}

/// Descriptor bundle for a new mirror job, supplied by the command front end.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewJobRequest {
    /// What to fetch: URL, magnet link, attachment reference.
    #[garde(length(min = 1, max = 4096))]
    pub source: String,

    /// Where to deliver the result, interpreted by the upload backend.
    #[serde(default)]
    #[garde(length(min = 1, max = 4096))]
    pub destination: Option<String>,

    #[garde(dive)]
    pub capabilities: Capabilities,

    /// Correlation data for the final notification (chat id, message id...).
    #[serde(default)]
    #[garde(skip)]
    pub requester: Option<serde_json::Value>,
}

/// One mirror job tracked end to end through the pipeline.
#[derive(Debug, Clone)]
pub struct MirrorJob {
    pub id: JobId,
    pub status: JobStatus,
    pub source: String,
    pub destination: Option<String>,
    pub capabilities: Capabilities,
    pub work_dir: PathBuf,
    pub requester: Option<serde_json::Value>,
    /// Last location reported by a finished stage (downloaded file, uploaded URL).
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the work directory has been removed so teardown runs once.
    pub work_dir_released: bool,
    /// Shared with in-flight backend work; cancelled on teardown.
    pub cancel: CancellationToken,
}

impl MirrorJob {
    pub fn new(id: JobId, request: NewJobRequest, work_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Created,
            source: request.source,
            destination: request.destination,
            capabilities: request.capabilities,
            work_dir,
            requester: request.requester,
            output: None,
            created_at: now,
            updated_at: now,
            work_dir_released: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            status: self.status,
            source: self.source.clone(),
            destination: self.destination.clone(),
            capabilities: self.capabilities.clone(),
            output: self.output.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only copy of a job, taken under the orchestrator lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub source: String,
    pub destination: Option<String>,
    pub capabilities: Capabilities,
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response after submitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}
