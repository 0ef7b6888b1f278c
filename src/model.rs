//! Shared event/evidence model used by all three engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity tiers, ordered so that `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Lenient parse for inbound events, which use Alertmanager-style
    /// labels ("warning", "crit") as often as our own tier names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "info" => Some(Severity::Low),
            "medium" | "warning" | "warn" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" | "crit" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The metric families the rule table knows about. Anything else passes
/// through as `Other` and is ignored by the threshold layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricKind {
    Cpu,
    Memory,
    ErrorRate,
    Latency,
    Up,
    Other(String),
}

impl MetricKind {
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::Latency => "latency",
            MetricKind::Up => "up",
            MetricKind::Other(s) => s,
        }
    }
}

impl From<String> for MetricKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "cpu" => MetricKind::Cpu,
            "memory" => MetricKind::Memory,
            "error_rate" => MetricKind::ErrorRate,
            "latency" => MetricKind::Latency,
            "up" => MetricKind::Up,
            _ => MetricKind::Other(s),
        }
    }
}

impl From<MetricKind> for String {
    fn from(k: MetricKind) -> Self {
        k.as_str().to_string()
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One metric reading, as scraped from the metrics store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub service: String,
    pub cluster: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A point-in-time capture of metric readings across services/clusters.
/// Immutable once captured; consumed by one `analyze` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub samples: Vec<MetricSample>,
    pub captured_at: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn new(samples: Vec<MetricSample>) -> Self {
        Self {
            samples,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Inbound event: a Prometheus-style alert, an orchestration event, or an
/// anomaly promoted by the detector. A tolerant mapping, not a fixed
/// schema -- unknown fields are preserved in `extra` and every known field
/// is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alertname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Event {
    pub fn alertname(&self) -> &str {
        self.alertname.as_deref().unwrap_or("unknown")
    }

    /// The addressable service, if the event carries one. `None` means the
    /// event is unresolvable for evidence gathering.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref().filter(|s| !s.is_empty())
    }

    pub fn cluster(&self) -> &str {
        self.cluster.as_deref().unwrap_or("local")
    }

    pub fn severity(&self) -> Option<Severity> {
        self.severity.as_deref().and_then(Severity::parse)
    }

    pub fn metric(&self) -> &str {
        self.metric.as_deref().unwrap_or("")
    }

    /// Numeric value if the payload carried one, accepting both JSON
    /// numbers and numeric strings.
    pub fn value_f64(&self) -> Option<f64> {
        match &self.value {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}
