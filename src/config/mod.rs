use serde::Deserialize;
use std::path::PathBuf;
use strum::IntoEnumIterator;

use crate::models::Stage;
use crate::services::orchestrator::{OrchestratorConfig, StageCapacities};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("{stage} queue size must be at least 1")]
    ZeroCapacity { stage: Stage },
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Listener address for status events and the job API. Keep it local.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Parent directory of per-job work directories
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Target root for the "local" uploader
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,

    #[serde(default = "default_download_queue_size")]
    pub download_queue_size: usize,

    #[serde(default = "default_archive_queue_size")]
    pub compression_queue_size: usize,

    #[serde(default = "default_archive_queue_size")]
    pub decompression_queue_size: usize,

    #[serde(default = "default_upload_queue_size")]
    pub upload_queue_size: usize,

    /// Chat bridge endpoint for completion messages. Logged only when unset.
    pub notify_webhook_url: Option<String>,

    /// S3-compatible bucket for the "s3" uploader
    pub s3_bucket: Option<String>,

    /// S3 endpoint URL
    pub s3_endpoint: Option<String>,

    /// S3 access key ID
    pub s3_access_key: Option<String>,

    /// S3 secret access key
    pub s3_secret_key: Option<String>,
}

/// Complete set of object storage settings.
#[derive(Debug, Clone)]
pub struct ObjectStorageConfig {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8448".to_string()
}

fn default_work_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_upload_root() -> PathBuf {
    PathBuf::from("./mirrored")
}

fn default_download_queue_size() -> usize {
    3
}

fn default_archive_queue_size() -> usize {
    1
}

fn default_upload_queue_size() -> usize {
    3
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Parse and check a set of `KEY=value` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        // A stage with no slots would hold every job forever
        if let Some(stage) = Stage::iter().find(|s| config.capacities().get(*s) == 0) {
            return Err(ConfigError::ZeroCapacity { stage });
        }
        Ok(config)
    }

    /// Object storage settings, only when all four are present.
    pub fn object_storage(&self) -> Option<ObjectStorageConfig> {
        Some(ObjectStorageConfig {
            bucket: self.s3_bucket.clone()?,
            endpoint: self.s3_endpoint.clone()?,
            access_key: self.s3_access_key.clone()?,
            secret_key: self.s3_secret_key.clone()?,
        })
    }

    pub fn capacities(&self) -> StageCapacities {
        StageCapacities {
            download: self.download_queue_size,
            compression: self.compression_queue_size,
            decompression: self.decompression_queue_size,
            upload: self.upload_queue_size,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            work_root: self.work_root.clone(),
            capacities: self.capacities(),
        }
    }
}
