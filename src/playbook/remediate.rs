//! HTTP remediation hook: one POST carrying the triggering event to an
//! external controller (e.g. a scaler). The hook decides what to do; the
//! core only records the outcome.

use std::time::Duration;

use reqwest::Client;

use crate::model::Event;

use super::{RemediateError, RemediationHook};

pub struct HttpRemediationHook {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpRemediationHook {
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
impl RemediationHook for HttpRemediationHook {
    async fn remediate(&self, event: &Event) -> Result<String, RemediateError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "service": event.service(),
                "cluster": event.cluster(),
                "event": event,
            }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemediateError::Timeout
                } else {
                    RemediateError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RemediateError::Http {
                status: status.as_u16(),
            });
        }
        let body = resp.text().await.unwrap_or_default();
        Ok(if body.is_empty() {
            "remediation hook accepted the request".to_string()
        } else {
            body.chars().take(200).collect()
        })
    }
}
