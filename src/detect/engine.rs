//! Two-layer anomaly detector. Layer 1 asks the reasoning backend for a
//! structured analysis; any timeout, transport error, or schema violation
//! degrades to the rule-based layer. `analyze` never fails.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::model::{MetricSnapshot, Severity};
use crate::reasoning::{extract::extract_json, ReasoningBackend};

use super::{rules, AnalysisResult, Anomaly, DetectError};

/// How many analysis cycles of history feed the trend endpoint.
const HISTORY_CAP: usize = 576; // 48h of 5-minute cycles

#[derive(Debug, Clone)]
struct HistoryEntry {
    timestamp: DateTime<Utc>,
    anomaly_count: usize,
}

/// Anomaly-rate trend over a lookback window.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrendReport {
    pub trend: String,
    pub total_anomalies: usize,
    pub anomalies_per_hour: f64,
    pub description: String,
}

pub struct AnomalyDetector {
    reasoning: Option<Arc<dyn ReasoningBackend>>,
    timeout: Duration,
    history: Mutex<VecDeque<HistoryEntry>>,
}

impl AnomalyDetector {
    pub fn new(reasoning: Option<Arc<dyn ReasoningBackend>>, timeout: Duration) -> Self {
        Self {
            reasoning,
            timeout,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Analyze a snapshot. Guaranteed to return a well-formed result; the
    /// `engine` field records which layer produced it.
    pub async fn analyze(&self, snapshot: &MetricSnapshot) -> AnalysisResult {
        let result = if snapshot.is_empty() {
            rules::empty_result()
        } else {
            match &self.reasoning {
                Some(backend) => match self.reasoning_layer(backend.as_ref(), snapshot).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, "reasoning layer unavailable, falling back to rules");
                        rules::analyze(snapshot)
                    }
                },
                None => rules::analyze(snapshot),
            }
        };

        self.record(&result);
        info!(
            engine = %result.engine,
            anomalies = result.anomalies.len(),
            health = result.overall_health_score,
            "analysis complete"
        );
        result
    }

    async fn reasoning_layer(
        &self,
        backend: &dyn ReasoningBackend,
        snapshot: &MetricSnapshot,
    ) -> Result<AnalysisResult, anyhow::Error> {
        let prompt = build_prompt(snapshot);
        let text = backend.complete(&prompt, self.timeout).await?;
        debug!(chars = text.len(), "reasoning layer responded");

        let payload = parse_reasoning_payload(&text)?;
        Ok(AnalysisResult::assemble(
            payload.anomalies,
            payload.overall_health_score,
            payload.insights,
            format!("reasoning/{}", backend.tag()),
            snapshot.len(),
        ))
    }

    fn record(&self, result: &AnalysisResult) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(HistoryEntry {
            timestamp: result.analysis_timestamp,
            anomaly_count: result.anomalies.len(),
        });
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
    }

    /// Anomaly trend over the last `hours`, comparing first-half and
    /// second-half averages with a 20% dead band.
    pub fn trends(&self, hours: u64) -> TrendReport {
        let cutoff = Utc::now() - chrono::Duration::hours(hours as i64);
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let recent: Vec<&HistoryEntry> =
            history.iter().filter(|e| e.timestamp > cutoff).collect();

        if recent.is_empty() {
            return TrendReport {
                trend: "stable".to_string(),
                total_anomalies: 0,
                anomalies_per_hour: 0.0,
                description: "No anomalies recorded in the requested window".to_string(),
            };
        }

        let total: usize = recent.iter().map(|e| e.anomaly_count).sum();
        let mid = recent.len() / 2;
        let (first, second) = recent.split_at(mid.max(1));
        let first_avg =
            first.iter().map(|e| e.anomaly_count).sum::<usize>() as f64 / first.len() as f64;
        let second_avg = if second.is_empty() {
            first_avg
        } else {
            second.iter().map(|e| e.anomaly_count).sum::<usize>() as f64 / second.len() as f64
        };

        let trend = if second_avg > first_avg * 1.2 {
            "increasing"
        } else if second_avg < first_avg * 0.8 {
            "decreasing"
        } else {
            "stable"
        };

        TrendReport {
            trend: trend.to_string(),
            total_anomalies: total,
            anomalies_per_hour: total as f64 / hours as f64,
            description: format!("Anomaly rate is {trend} over the last {hours} hours"),
        }
    }
}

/// Structured prompt embedding every sample plus the healthy-range
/// guidance from the rule table.
fn build_prompt(snapshot: &MetricSnapshot) -> String {
    let mut prompt = String::from(
        "You are an observability analyst. Analyze the following fleet metric \
         snapshot and respond with STRICT JSON only, no prose, matching:\n\
         {\"anomalies\": [{\"metric\": str, \"service\": str, \"cluster\": str, \
         \"value\": number, \"anomaly_score\": number, \"severity\": \
         \"low\"|\"medium\"|\"high\"|\"critical\", \"reasoning\": str}], \
         \"overall_health_score\": number (0-100), \
         \"insights\": [str] (between 4 and 6 entries)}\n\n\
         Healthy ranges: cpu <= 70%, memory <= 400MB, error_rate <= 1%, \
         latency p99 <= 500ms, up flag == 1.\n\nSnapshot:\n",
    );
    for s in &snapshot.samples {
        prompt.push_str(&format!(
            "- service={} cluster={} metric={} value={:.2} at {}\n",
            s.service,
            s.cluster,
            s.kind,
            s.value,
            s.timestamp.to_rfc3339()
        ));
    }
    prompt
}

#[derive(Deserialize)]
struct RawAnomaly {
    metric: String,
    service: String,
    #[serde(default)]
    cluster: Option<String>,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    anomaly_score: Option<f64>,
    severity: String,
    reasoning: String,
}

#[derive(Deserialize)]
struct RawPayload {
    anomalies: Vec<RawAnomaly>,
    overall_health_score: f64,
    insights: Vec<String>,
}

struct ValidPayload {
    anomalies: Vec<Anomaly>,
    overall_health_score: f64,
    insights: Vec<String>,
}

/// Extract, parse, and validate the reasoning response against the
/// analysis schema. Every violation is an error so the caller can fall
/// back to the rule layer.
fn parse_reasoning_payload(text: &str) -> Result<ValidPayload, DetectError> {
    let json = extract_json(text).ok_or(DetectError::NoJson)?;
    let raw: RawPayload =
        serde_json::from_str(json).map_err(|e| DetectError::Schema(e.to_string()))?;

    if !(0.0..=100.0).contains(&raw.overall_health_score) {
        return Err(DetectError::Schema(format!(
            "health score {} outside 0-100",
            raw.overall_health_score
        )));
    }
    if !(4..=6).contains(&raw.insights.len()) {
        return Err(DetectError::Schema(format!(
            "expected 4-6 insights, got {}",
            raw.insights.len()
        )));
    }

    let now = Utc::now();
    let mut anomalies = Vec::with_capacity(raw.anomalies.len());
    for a in raw.anomalies {
        let severity = Severity::parse(&a.severity)
            .ok_or_else(|| DetectError::Schema(format!("unknown severity '{}'", a.severity)))?;
        if a.reasoning.trim().is_empty() {
            return Err(DetectError::Schema("anomaly missing reasoning".to_string()));
        }
        anomalies.push(Anomaly {
            metric: a.metric.into(),
            service: a.service,
            cluster: a.cluster.unwrap_or_else(|| "local".to_string()),
            value: a.value.unwrap_or(0.0),
            anomaly_score: a.anomaly_score.unwrap_or_else(|| match severity {
                Severity::Critical => -0.8,
                Severity::High => -0.6,
                Severity::Medium => -0.4,
                Severity::Low => -0.2,
            }),
            severity,
            timestamp: now,
            reasoning: a.reasoning,
            details: Default::default(),
        });
    }

    Ok(ValidPayload {
        anomalies,
        overall_health_score: raw.overall_health_score,
        insights: raw.insights,
    })
}
