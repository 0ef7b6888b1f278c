//! HTTP reasoning providers: OpenAI-compatible chat completions and a
//! local Ollama daemon. Both reduce to one POST and one string field out.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use super::{ReasoningBackend, ReasoningError};
use crate::config::{ReasoningConfig, ReasoningProvider};

pub struct HttpBackend {
    client: Client,
    cfg: ReasoningConfig,
}

impl HttpBackend {
    pub fn new(cfg: ReasoningConfig) -> Self {
        Self {
            // Per-request deadlines are applied at call time; the client
            // itself carries no default timeout.
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            cfg,
        }
    }

    fn request_body(&self, prompt: &str) -> (String, Value) {
        match self.cfg.provider {
            ReasoningProvider::Ollama => (
                format!("{}/api/generate", self.cfg.endpoint.trim_end_matches('/')),
                json!({
                    "model": self.cfg.model,
                    "prompt": prompt,
                    "stream": false,
                }),
            ),
            // Disabled never constructs a backend; treat it as openai-compatible
            // so the match stays exhaustive.
            _ => (
                format!(
                    "{}/v1/chat/completions",
                    self.cfg.endpoint.trim_end_matches('/')
                ),
                json!({
                    "model": self.cfg.model,
                    "messages": [{"role": "user", "content": prompt}],
                    "temperature": 0.2,
                }),
            ),
        }
    }

    fn text_from_response(&self, body: &Value) -> Option<String> {
        match self.cfg.provider {
            ReasoningProvider::Ollama => body
                .get("response")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[async_trait::async_trait]
impl ReasoningBackend for HttpBackend {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, ReasoningError> {
        let (url, body) = self.request_body(prompt);

        let mut req = self.client.post(&url).json(&body).timeout(timeout);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Timeout(timeout)
            } else {
                ReasoningError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ReasoningError::Http {
                status: status.as_u16(),
            });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| ReasoningError::Transport(e.to_string()))?;

        let text = self
            .text_from_response(&payload)
            .ok_or(ReasoningError::EmptyResponse)?;
        if text.trim().is_empty() {
            return Err(ReasoningError::EmptyResponse);
        }
        Ok(text)
    }

    fn tag(&self) -> String {
        let provider = match self.cfg.provider {
            ReasoningProvider::Ollama => "ollama",
            _ => "openai-compatible",
        };
        format!("{}({})", provider, self.cfg.model)
    }
}
