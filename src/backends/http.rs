use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;

use crate::services::backend::{BackendError, StageBackend, StageContext, StageOutput};

const FALLBACK_FILE_NAME: &str = "download";

/// Streams an `http(s)://` source into the job's work directory.
pub struct HttpDownloader {
    http: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, BackendError> {
        let http = Client::builder()
            .user_agent(concat!("mirror-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

/// Last non-empty path segment of the URL, or a fixed fallback.
fn file_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .filter(|name| *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[async_trait]
impl StageBackend for HttpDownloader {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, BackendError> {
        let job = &ctx.job;
        let url = Url::parse(&job.source)
            .map_err(|e| BackendError::Unsupported(format!("{}: {e}", job.source)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BackendError::Unsupported(format!(
                "scheme '{}' is not handled by the http downloader",
                url.scheme()
            )));
        }

        let path = job.work_dir.join(file_name_for(&url));
        tracing::debug!(job_id = %job.id, url = %url, path = %path.display(), "Downloading");

        let mut response = self.http.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(&path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(job_id = %job.id, bytes = written, "Download finished");
        Ok(StageOutput::at(path.display().to_string()))
    }
}
