//! Read-only evidence sources queried during analysis and investigation:
//! a metrics store, a log store, and an orchestration-state provider.
//! Engines hold these as trait objects so tests can substitute stubs.

pub mod kube;
pub mod loki;
pub mod victoria;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{MetricKind, MetricSnapshot};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source returned HTTP {status}")]
    Http { status: u16 },
    #[error("source call timed out")]
    Timeout,
    #[error("source transport error: {0}")]
    Transport(String),
    #[error("source returned a malformed payload: {0}")]
    Malformed(String),
}

impl SourceError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// One `(timestamp, value)` pair from a metrics range query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Log line classification, derived from stream labels or line content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Classify from an explicit label when present, otherwise scan the
    /// line for the usual markers.
    pub fn classify(label: Option<&str>, line: &str) -> Self {
        if let Some(l) = label {
            match l.to_ascii_lowercase().as_str() {
                "error" | "fatal" | "critical" => return LogLevel::Error,
                "warn" | "warning" => return LogLevel::Warn,
                "info" | "debug" | "trace" => return LogLevel::Info,
                _ => {}
            }
        }
        let upper = line.to_ascii_uppercase();
        if ["ERROR", "FATAL", "EXCEPTION", "PANIC", "OOM", "KILLED"]
            .iter()
            .any(|kw| upper.contains(kw))
        {
            LogLevel::Error
        } else if upper.contains("WARN") {
            LogLevel::Warn
        } else {
            LogLevel::Info
        }
    }
}

/// One log line returned by the log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub line: String,
    pub level: LogLevel,
    pub labels: BTreeMap<String, String>,
}

/// Container-level status from the orchestration provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    pub restart_count: u32,
    /// Reason of the last terminated state, e.g. "OOMKilled".
    pub last_state: Option<String>,
}

/// A recent warning event attached to the workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadEvent {
    pub reason: String,
    pub message: String,
    pub count: u32,
}

/// Structured snapshot of a workload instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub containers: Vec<ContainerStatus>,
    pub events: Vec<WorkloadEvent>,
}

impl WorkloadStatus {
    pub fn restart_count(&self) -> u32 {
        self.containers.iter().map(|c| c.restart_count).sum()
    }

    pub fn last_state(&self) -> Option<&str> {
        self.containers.iter().find_map(|c| c.last_state.as_deref())
    }
}

/// Metrics store query contract. Returns empty for "no data"; errors are
/// reserved for transport-level failures.
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync {
    async fn query(
        &self,
        service: &str,
        metric: &MetricKind,
        cluster: &str,
        window: Duration,
    ) -> Result<Vec<MetricPoint>, SourceError>;

    /// Pull the fleet-wide snapshot for one analysis cycle.
    async fn scrape_fleet(&self) -> Result<MetricSnapshot, SourceError>;
}

/// Log store query contract.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    async fn query(
        &self,
        service: &str,
        window: Duration,
        limit: usize,
    ) -> Result<Vec<LogLine>, SourceError>;
}

/// Orchestration-state describe contract. `Ok(None)` means the workload
/// could not be found, which is not an error.
#[async_trait::async_trait]
pub trait OrchestrationSource: Send + Sync {
    async fn describe(
        &self,
        service: &str,
        cluster: &str,
    ) -> Result<Option<WorkloadStatus>, SourceError>;
}
