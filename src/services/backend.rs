//! Backend adapter contract and registry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::{Capabilities, MirrorJob, Stage};

/// Everything a backend gets to work with for one stage run.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stage: Stage,
    /// Snapshot of the job record at the time the stage became active.
    pub job: MirrorJob,
    /// Cancelled when the job is torn down. Runs are also dropped at that
    /// point, so observing it is only needed for work spawned elsewhere.
    pub cancel: CancellationToken,
}

/// What a successful stage run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    /// Where the result lives (file path, bucket URL, share link).
    pub location: Option<String>,
}

impl StageOutput {
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
        }
    }
}

/// A pluggable unit performing one stage for a job.
///
/// # Cancel Safety
///
/// The orchestrator drops the `run` future when the job is cancelled.
/// Anything left in the job's work directory is removed by the teardown.
#[async_trait]
pub trait StageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP transfer failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Object storage operation failed: {0}")]
    Storage(#[from] s3::error::S3Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported source or destination: {0}")]
    Unsupported(String),

    #[error("Backend configuration error: {0}")]
    Config(String),

    #[error("Stage cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Backends available to the orchestrator, looked up per job.
///
/// Download and upload backends are chosen by name from the job's
/// capabilities; compression and decompression each have a single slot.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    downloaders: HashMap<String, Arc<dyn StageBackend>>,
    uploaders: HashMap<String, Arc<dyn StageBackend>>,
    compressor: Option<Arc<dyn StageBackend>>,
    decompressor: Option<Arc<dyn StageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_downloader(mut self, name: impl Into<String>, backend: Arc<dyn StageBackend>) -> Self {
        self.downloaders.insert(name.into(), backend);
        self
    }

    pub fn with_uploader(mut self, name: impl Into<String>, backend: Arc<dyn StageBackend>) -> Self {
        self.uploaders.insert(name.into(), backend);
        self
    }

    pub fn with_compressor(mut self, backend: Arc<dyn StageBackend>) -> Self {
        self.compressor = Some(backend);
        self
    }

    pub fn with_decompressor(mut self, backend: Arc<dyn StageBackend>) -> Self {
        self.decompressor = Some(backend);
        self
    }

    /// The backend a job uses for `stage`, if one is registered.
    pub fn resolve(&self, stage: Stage, caps: &Capabilities) -> Option<Arc<dyn StageBackend>> {
        match stage {
            Stage::Download => self.downloaders.get(&caps.downloader).cloned(),
            Stage::Compression => self.compressor.clone(),
            Stage::Decompression => self.decompressor.clone(),
            Stage::Upload => self.uploaders.get(&caps.uploader).cloned(),
        }
    }

    /// First stage the job needs that has no backend, with the name asked for.
    pub fn missing(&self, caps: &Capabilities) -> Option<(Stage, String)> {
        [Stage::Download, Stage::Compression, Stage::Decompression, Stage::Upload]
            .into_iter()
            .filter(|stage| caps.requires(*stage))
            .find(|stage| self.resolve(*stage, caps).is_none())
            .map(|stage| {
                let name = match stage {
                    Stage::Download => caps.downloader.clone(),
                    Stage::Upload => caps.uploader.clone(),
                    other => other.to_string(),
                };
                (stage, name)
            })
    }

    pub fn downloader_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.downloaders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn uploader_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.uploaders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("downloaders", &self.downloader_names())
            .field("uploaders", &self.uploader_names())
            .field("compressor", &self.compressor.as_ref().map(|b| b.name()))
            .field("decompressor", &self.decompressor.as_ref().map(|b| b.name()))
            .finish()
    }
}
