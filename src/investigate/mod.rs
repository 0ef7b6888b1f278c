//! Root-cause investigation: evidence gathering from metrics, logs, and
//! orchestration state, followed by a synthesis step.

pub mod engine;
pub mod synthesis;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Event;
use crate::sources::{LogLine, WorkloadStatus};

/// Lookback window for evidence queries.
pub const EVIDENCE_WINDOW_SECS: u64 = 300;
/// Cap on log lines held as evidence.
pub const LOG_EVIDENCE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationStatus {
    Pending,
    Investigating,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance of one evidence call, in call order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceStep {
    pub tool: String,
    pub query: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// A structured investigation report. Owned by the engine; read-only to
/// callers once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub id: String,
    pub status: InvestigationStatus,
    pub alert: Event,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub steps: Vec<EvidenceStep>,
    pub log_evidence: Vec<LogLine>,
    pub metric_evidence: BTreeMap<String, f64>,
    pub k8s_context: Option<WorkloadStatus>,
    pub root_cause: String,
    pub ai_summary: String,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: Confidence,
}

impl Investigation {
    pub(crate) fn new(id: String, alert: Event) -> Self {
        Self {
            id,
            status: InvestigationStatus::Pending,
            alert,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            steps: Vec::new(),
            log_evidence: Vec::new(),
            metric_evidence: BTreeMap::new(),
            k8s_context: None,
            root_cause: String::new(),
            ai_summary: String::new(),
            findings: Vec::new(),
            recommendations: Vec::new(),
            confidence: Confidence::Medium,
        }
    }

    pub(crate) fn add_step(&mut self, tool: &str, query: String, result: String) {
        self.steps.push(EvidenceStep {
            tool: tool.to_string(),
            query,
            result,
            timestamp: Utc::now(),
        });
    }

    /// Set the terminal state exactly once.
    pub(crate) fn finish(&mut self, status: InvestigationStatus) {
        debug_assert!(matches!(
            status,
            InvestigationStatus::Complete | InvestigationStatus::Failed
        ));
        if self.completed_at.is_some() {
            return;
        }
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_seconds = Some(
            (now - self.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );
    }
}
