//! Reasoning backend -- the "submit prompt, get text back, possibly time
//! out" capability used by the anomaly detector and the investigation
//! synthesis phase. Providers are interchangeable and selected by
//! configuration, never by dispatch logic inside the engines.

pub mod extract;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ReasoningConfig, ReasoningProvider};

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("reasoning backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("reasoning backend returned HTTP {status}")]
    Http { status: u16 },
    #[error("reasoning backend transport error: {0}")]
    Transport(String),
    #[error("reasoning backend returned an empty or unrecognized payload")]
    EmptyResponse,
}

/// Text-completion capability. Implementations must enforce the supplied
/// deadline -- a hung call here must never stall an analysis cycle.
#[async_trait::async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, ReasoningError>;

    /// Provenance tag, e.g. `openai-compatible(gpt-4o-mini)`. Stamped into
    /// `AnalysisResult.engine` as `reasoning/<tag>` on Layer 1 success.
    fn tag(&self) -> String;
}

/// Build the configured backend, or `None` when reasoning is disabled.
pub fn from_config(cfg: &ReasoningConfig) -> Option<Arc<dyn ReasoningBackend>> {
    match cfg.provider {
        ReasoningProvider::Disabled => None,
        ReasoningProvider::OpenaiCompatible | ReasoningProvider::Ollama => {
            Some(Arc::new(http::HttpBackend::new(cfg.clone())))
        }
    }
}
