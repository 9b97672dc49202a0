//! Reference backend adapters.
//!
//! These cover plain HTTP downloads, local directory copies and
//! S3-compatible uploads. Anything else plugs in through
//! [`StageBackend`](crate::services::backend::StageBackend).

pub mod http;
pub mod local;
pub mod object_storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::backend::{BackendError, BackendRegistry};

/// Registry with every backend the configuration enables.
pub fn registry_from_config(config: &AppConfig) -> Result<BackendRegistry, BackendError> {
    let mut registry = BackendRegistry::new()
        .with_downloader("http", Arc::new(http::HttpDownloader::new()?))
        .with_downloader("file", Arc::new(local::LocalCopyDownloader))
        .with_uploader(
            "local",
            Arc::new(local::LocalDirectoryUploader::new(&config.upload_root)),
        );

    if let Some(s3) = config.object_storage() {
        tracing::info!(bucket = %s3.bucket, endpoint = %s3.endpoint, "Object storage uploader enabled");
        let uploader = object_storage::ObjectStorageUploader::new(
            &s3.bucket,
            &s3.endpoint,
            &s3.access_key,
            &s3.secret_key,
        )?;
        registry = registry.with_uploader("s3", Arc::new(uploader));
    }

    Ok(registry)
}

/// Every regular file under `root`, as paths relative to it, sorted.
pub(crate) async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, BackendError> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let mut entries = tokio::fs::read_dir(root.join(&relative)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = relative.join(entry.file_name());
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
