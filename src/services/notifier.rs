use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::models::JobId;

/// Final message for the requester of a job that finished uploading.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionNotice {
    pub job_id: JobId,
    pub location: Option<String>,
    pub requester: Option<serde_json::Value>,
}

impl CompletionNotice {
    /// Human-readable text sent back to the conversation.
    pub fn message(&self) -> String {
        match &self.location {
            Some(location) => format!("Uploaded: [{}] [{}]", self.job_id, location),
            None => format!("Uploaded: [{}]", self.job_id),
        }
    }
}

/// Delivers completion notices to whoever requested the job.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError>;
}

/// Writes notices to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        tracing::info!(
            job_id = %notice.job_id,
            location = notice.location.as_deref().unwrap_or("-"),
            "{}",
            notice.message()
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    job_id: &'a JobId,
    location: Option<&'a str>,
    requester: Option<&'a serde_json::Value>,
}

/// Posts notices as JSON to a chat bridge webhook.
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(NotifyError::Http)?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            text: notice.message(),
            job_id: &notice.job_id,
            location: notice.location.as_deref(),
            requester: notice.requester.as_ref(),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(NotifyError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification endpoint answered with status {0}")]
    Rejected(u16),
}
