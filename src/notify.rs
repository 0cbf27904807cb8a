//! Completion notifications for export jobs.
//!
//! Notification is best-effort at the boundary of the pipeline: failures
//! are logged and never change an export's outcome.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Notification endpoint returned HTTP {0}")]
    HttpStatus(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Drops every notification. Used when no endpoint is configured.
#[derive(Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _title: &str, _body: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    body: &'a str,
}

/// POSTs a JSON payload to a configured webhook endpoint.
pub struct WebhookNotifier {
    http: reqwest::Client,
    endpoint: Url,
}

impl WebhookNotifier {
    pub fn new(endpoint: Url) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&WebhookPayload { title, body })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status().as_u16()));
        }
        tracing::debug!(title, "Notification delivered");
        Ok(())
    }
}
