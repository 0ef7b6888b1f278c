//! TOML configuration for the FleetMedic daemon.
//!
//! Layered model: `FLEETMEDIC_CONFIG` environment override, then the
//! standard system location, then compiled-in defaults. Every section has
//! sensible defaults so a bare `fleetmedic serve` works against a local
//! docker-compose observability stack.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::Severity;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the fleetmedic process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub sources: SourcesConfig,
    pub reasoning: ReasoningConfig,
    pub notify: NotifyConfig,
    pub remediate: RemediateConfig,
    pub pipeline: PipelineConfig,
}

impl FleetConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded fleetmedic configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `FLEETMEDIC_CONFIG` environment variable.
    /// 2. `/etc/fleetmedic/fleetmedic.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("FLEETMEDIC_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FLEETMEDIC_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/fleetmedic/fleetmedic.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Evidence sources
// ---------------------------------------------------------------------------

/// Read-only evidence source endpoints (metrics, logs, orchestration).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// VictoriaMetrics / Prometheus-compatible query API base URL.
    pub metrics_url: String,
    /// Loki query API base URL.
    pub logs_url: String,
    /// Kubernetes API server base URL. Empty string disables the
    /// orchestration-context phase of investigations.
    pub orchestration_url: String,
    /// Namespace used when resolving workloads.
    pub namespace: String,
    /// Per-call timeout applied to every evidence query (seconds).
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            metrics_url: "http://victoria-metrics:8428".to_string(),
            logs_url: "http://loki:3100".to_string(),
            orchestration_url: String::new(),
            namespace: "default".to_string(),
            timeout_secs: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Reasoning backend
// ---------------------------------------------------------------------------

/// Which reasoning-backend wire protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningProvider {
    /// POST `{endpoint}/v1/chat/completions` with a bearer key.
    OpenaiCompatible,
    /// POST `{endpoint}/api/generate` (local Ollama daemon).
    Ollama,
    /// No reasoning layer; the detector and synthesis run rule-based only.
    Disabled,
}

/// Reasoning backend (text completion) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub provider: ReasoningProvider,
    pub endpoint: String,
    pub model: String,
    /// API key for openai-compatible providers. Optional; Ollama ignores it.
    pub api_key: Option<String>,
    /// Hard deadline for one completion call (seconds).
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: ReasoningProvider::Disabled,
            endpoint: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            timeout_secs: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification / remediation hooks
// ---------------------------------------------------------------------------

/// Notification dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook URL for enriched alerts. `None` logs notifications instead.
    pub webhook_url: Option<String>,
    /// Logical destination channel included in each message.
    pub channel: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel: "#platform-alerts".to_string(),
        }
    }
}

/// External remediation hook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediateConfig {
    /// URL receiving remediation requests (e.g. a scaling controller).
    /// `None` means remediation actions report the hook as unconfigured.
    pub hook_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Analysis-cycle and dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cron expression gating the periodic fleet analysis.
    pub analysis_cron: String,
    /// Minimum anomaly severity that is promoted to a dispatched event.
    pub auto_trigger_severity: Severity,
    /// SQLite ledger path.
    pub db_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_cron: "0 */5 * * * *".to_string(),
            auto_trigger_severity: Severity::High,
            db_path: "data/fleetmedic.db".to_string(),
        }
    }
}
