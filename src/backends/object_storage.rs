use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::Path;

use super::collect_files;
use crate::services::backend::{BackendError, StageBackend, StageContext, StageOutput};

/// Uploads a job's work directory to an S3-compatible bucket.
///
/// Objects land under `<prefix>/<job id>/<relative path>`, where the prefix is
/// the job's destination descriptor (empty when unset).
pub struct ObjectStorageUploader {
    bucket: Box<Bucket>,
    endpoint: String,
}

impl ObjectStorageUploader {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, BackendError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| BackendError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<(), BackendError> {
        let data = tokio::fs::read(path).await?;
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, "application/octet-stream")
            .await?;
        // Built without fail-on-err, so rejected writes still come back as Ok
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(BackendError::Other(format!(
                "object storage rejected {key} with status {status}"
            )));
        }
        Ok(())
    }
}

/// Object key prefix for a job: `<destination>/<job id>`.
fn key_prefix(destination: Option<&str>, job_id: &str) -> String {
    match destination.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty()) {
        Some(dest) => format!("{dest}/{job_id}"),
        None => job_id.to_string(),
    }
}

#[async_trait]
impl StageBackend for ObjectStorageUploader {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, BackendError> {
        let job = &ctx.job;
        let prefix = key_prefix(job.destination.as_deref(), job.id.as_str());

        let files = collect_files(&job.work_dir).await?;
        if files.is_empty() {
            return Err(BackendError::Other("nothing to upload".to_string()));
        }

        for relative in &files {
            let key = format!("{prefix}/{}", relative.to_string_lossy().replace('\\', "/"));
            tracing::debug!(job_id = %job.id, key = %key, "Uploading object");
            self.put_file(&key, &job.work_dir.join(relative)).await?;
        }

        tracing::info!(
            job_id = %job.id,
            objects = files.len(),
            bucket = %self.bucket.name(),
            "Upload to object storage complete"
        );
        Ok(StageOutput::at(format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket.name(),
            prefix
        )))
    }
}
