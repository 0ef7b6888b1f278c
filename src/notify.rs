//! Notification dispatch boundary. The core only needs
//! "send(channel, message) -> delivered | failed".

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification endpoint returned HTTP {status}")]
    Http { status: u16 },
    #[error("notification call timed out")]
    Timeout,
    #[error("notification transport error: {0}")]
    Transport(String),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError>;
}

/// Posts `{channel, text}` JSON to a configured webhook (Slack-style).
pub struct WebhookNotifier {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            url: url.to_string(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "channel": channel, "text": message }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout
                } else {
                    NotifyError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Http {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Fallback when no webhook is configured: notifications land in the
/// process log and count as delivered.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        info!(%channel, "notification: {message}");
        Ok(())
    }
}
