//! Anomaly detection: a reasoning-backend layer with a deterministic
//! rule-based fallback, sharing one `AnalysisResult` contract.

pub mod engine;
pub mod rules;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{MetricKind, Severity};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("reasoning layer returned no parseable JSON")]
    NoJson,
    #[error("reasoning payload violated the analysis schema: {0}")]
    Schema(String),
}

/// One detected anomaly. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: MetricKind,
    pub service: String,
    pub cluster: String,
    pub value: f64,
    pub anomaly_score: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub reasoning: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Result of one analysis call. Produced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub anomalies: Vec<Anomaly>,
    pub overall_health_score: f64,
    pub insights: Vec<String>,
    pub anomalies_detected: bool,
    /// Provenance: `reasoning/<provider>(<model>)` or `rule-based`.
    pub engine: String,
    pub analysis_timestamp: DateTime<Utc>,
    pub data_points: usize,
}

impl AnalysisResult {
    /// Assemble a result, maintaining the
    /// `anomalies_detected == !anomalies.is_empty()` invariant.
    pub fn assemble(
        anomalies: Vec<Anomaly>,
        overall_health_score: f64,
        insights: Vec<String>,
        engine: String,
        data_points: usize,
    ) -> Self {
        Self {
            anomalies_detected: !anomalies.is_empty(),
            anomalies,
            overall_health_score,
            insights,
            engine,
            analysis_timestamp: Utc::now(),
            data_points,
        }
    }
}
