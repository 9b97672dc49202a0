use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::collect_files;
use crate::services::backend::{BackendError, StageBackend, StageContext, StageOutput};

/// Accepts only plain relative paths, so a descriptor can't escape its root.
fn confined(relative: &str) -> Option<PathBuf> {
    let path = Path::new(relative);
    let plain = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (plain && path.components().next().is_some()).then(|| path.to_path_buf())
}

/// Copies the files of the job's work directory into `<root>/<destination>`.
///
/// Without a destination the job id names the target directory.
pub struct LocalDirectoryUploader {
    root: PathBuf,
}

impl LocalDirectoryUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target_for(&self, destination: Option<&str>, job_id: &str) -> Result<PathBuf, BackendError> {
        match destination {
            Some(dest) => confined(dest)
                .map(|rel| self.root.join(rel))
                .ok_or_else(|| BackendError::Unsupported(format!("destination '{dest}'"))),
            None => Ok(self.root.join(job_id)),
        }
    }
}

#[async_trait]
impl StageBackend for LocalDirectoryUploader {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, BackendError> {
        let job = &ctx.job;
        let target = self.target_for(job.destination.as_deref(), job.id.as_str())?;

        let files = collect_files(&job.work_dir).await?;
        for relative in &files {
            let to = target.join(relative);
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(job.work_dir.join(relative), &to).await?;
        }

        tracing::info!(job_id = %job.id, files = files.len(), target = %target.display(), "Copied to local destination");
        Ok(StageOutput::at(target.display().to_string()))
    }
}

/// Copies a local file (the job's source path) into the work directory.
#[derive(Debug, Default)]
pub struct LocalCopyDownloader;

#[async_trait]
impl StageBackend for LocalCopyDownloader {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, BackendError> {
        let job = &ctx.job;
        let source = Path::new(job.source.strip_prefix("file://").unwrap_or(&job.source));
        let name = source
            .file_name()
            .ok_or_else(|| BackendError::Unsupported(job.source.clone()))?;

        let to = job.work_dir.join(name);
        let bytes = tokio::fs::copy(source, &to).await?;
        tracing::debug!(job_id = %job.id, bytes, "Copied local source");
        Ok(StageOutput::at(to.display().to_string()))
    }
}
