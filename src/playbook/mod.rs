//! Playbooks: trigger matching, ordered action execution, run ledger.

pub mod builtin;
pub mod engine;
pub mod remediate;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Event, Severity};

#[derive(Debug, Error)]
pub enum RemediateError {
    #[error("remediation hook returned HTTP {status}")]
    Http { status: u16 },
    #[error("remediation hook call timed out")]
    Timeout,
    #[error("remediation hook transport error: {0}")]
    Transport(String),
}

/// External remediation boundary (e.g. a scaling controller). Gated by
/// each playbook's `auto_remediate` flag.
#[async_trait::async_trait]
pub trait RemediationHook: Send + Sync {
    async fn remediate(&self, event: &Event) -> Result<String, RemediateError>;
}

/// A serializable trigger predicate. A trigger matches when ANY of its
/// rules accepts the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Alert name is one of the listed names.
    AlertNameIn(Vec<String>),
    /// Alert name contains the pattern (case-insensitive).
    AlertNameContains(String),
    /// Event severity equals the tier.
    SeverityIs(Severity),
    /// Metric name contains the pattern, optionally with a value floor.
    MetricContains {
        pattern: String,
        min_value: Option<f64>,
    },
    /// Event source equals the value.
    SourceIs(String),
    /// A named payload field equals the value (extra fields included).
    FieldEquals { field: String, value: String },
    /// A named payload field contains the pattern (case-insensitive).
    FieldContains { field: String, pattern: String },
}

fn event_field(event: &Event, field: &str) -> Option<String> {
    match field {
        "alertname" => event.alertname.clone(),
        "source" => event.source.clone(),
        "service" => event.service.clone(),
        "cluster" => event.cluster.clone(),
        "severity" => event.severity.clone(),
        "metric" => event.metric.clone(),
        "description" => event.description.clone(),
        _ => event.extra.get(field).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    }
    .filter(|s| !s.is_empty())
}

impl TriggerRule {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            TriggerRule::AlertNameIn(names) => {
                names.iter().any(|n| n == event.alertname())
            }
            TriggerRule::AlertNameContains(pattern) => event
                .alertname()
                .to_ascii_lowercase()
                .contains(&pattern.to_ascii_lowercase()),
            TriggerRule::SeverityIs(tier) => event.severity() == Some(*tier),
            TriggerRule::MetricContains { pattern, min_value } => {
                let metric_hit = event
                    .metric()
                    .to_ascii_lowercase()
                    .contains(&pattern.to_ascii_lowercase());
                match min_value {
                    Some(floor) => {
                        metric_hit && event.value_f64().is_some_and(|v| v > *floor)
                    }
                    None => metric_hit,
                }
            }
            TriggerRule::SourceIs(source) => event.source.as_deref() == Some(source),
            TriggerRule::FieldEquals { field, value } => {
                event_field(event, field).as_deref() == Some(value)
            }
            TriggerRule::FieldContains { field, pattern } => event_field(event, field)
                .map(|v| {
                    v.to_ascii_lowercase()
                        .contains(&pattern.to_ascii_lowercase())
                })
                .unwrap_or(false),
        }
    }
}

/// Named trigger: fires when any rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub rules: Vec<TriggerRule>,
}

impl Trigger {
    pub fn matches(&self, event: &Event) -> bool {
        self.rules.iter().any(|r| r.matches(event))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Notify,
    Investigate,
    Remediate,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::Notify => "notify",
            ActionKind::Investigate => "investigate",
            ActionKind::Remediate => "remediate",
        };
        write!(f, "{s}")
    }
}

/// A single step in a playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(name: &str, description: &str, kind: ActionKind) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
        }
    }
}

/// Static playbook configuration. `run_count` and `last_run` are the only
/// mutable fields, updated after each run under the registry lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
    pub auto_remediate: bool,
    pub tags: Vec<String>,
    pub run_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Playbook {
    pub fn new(
        name: &str,
        description: &str,
        triggers: Vec<Trigger>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            name: name.to_string(),
            description: description.to_string(),
            triggers,
            actions,
            auto_remediate: false,
            tags: Vec::new(),
            run_count: 0,
            last_run: None,
            created_at: Utc::now(),
        }
    }

    pub fn auto_remediate(mut self) -> Self {
        self.auto_remediate = true;
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.triggers.iter().any(|t| t.matches(event))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

/// Record of one executed action, appended as each action completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub description: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Execution record for a single playbook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookRun {
    pub id: String,
    pub playbook_id: String,
    pub playbook_name: String,
    pub event: Event,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub status: RunStatus,
    pub actions_taken: Vec<ActionRecord>,
    pub investigation_id: Option<String>,
    pub enrichment: BTreeMap<String, serde_json::Value>,
}

impl PlaybookRun {
    pub(crate) fn new(playbook: &Playbook, event: Event) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            playbook_id: playbook.id.clone(),
            playbook_name: playbook.name.clone(),
            event,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            status: RunStatus::Running,
            actions_taken: Vec::new(),
            investigation_id: None,
            enrichment: BTreeMap::new(),
        }
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: serde_json::Value) -> Event {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_alertname_rules() {
        let rule = TriggerRule::AlertNameIn(vec!["ServiceDown".into(), "InstanceDown".into()]);
        assert!(rule.matches(&event(serde_json::json!({"alertname": "ServiceDown"}))));
        assert!(!rule.matches(&event(serde_json::json!({"alertname": "HighCPUUsage"}))));

        let rule = TriggerRule::AlertNameContains("oom".into());
        assert!(rule.matches(&event(serde_json::json!({"alertname": "PodOOMKilled"}))));
    }

    #[test]
    fn test_metric_rule_with_value_floor() {
        let rule = TriggerRule::MetricContains {
            pattern: "cpu".into(),
            min_value: Some(80.0),
        };
        assert!(rule.matches(&event(
            serde_json::json!({"metric": "cpu", "value": 94.7})
        )));
        assert!(!rule.matches(&event(
            serde_json::json!({"metric": "cpu", "value": 50.0})
        )));
        assert!(!rule.matches(&event(serde_json::json!({"metric": "cpu"}))));
    }

    #[test]
    fn test_severity_and_source_rules() {
        let rule = TriggerRule::SeverityIs(Severity::Critical);
        assert!(rule.matches(&event(serde_json::json!({"severity": "critical"}))));
        assert!(!rule.matches(&event(serde_json::json!({"severity": "warning"}))));

        let rule = TriggerRule::SourceIs("detector".into());
        assert!(rule.matches(&event(serde_json::json!({"source": "detector"}))));
    }

    #[test]
    fn test_field_rules_reach_extra_payload() {
        let rule = TriggerRule::FieldEquals {
            field: "last_state".into(),
            value: "OOMKilled".into(),
        };
        assert!(rule.matches(&event(serde_json::json!({"last_state": "OOMKilled"}))));

        let rule = TriggerRule::FieldContains {
            field: "reason".into(),
            pattern: "oom".into(),
        };
        assert!(rule.matches(&event(serde_json::json!({"reason": "OOMKilling"}))));
        assert!(!rule.matches(&event(serde_json::json!({}))));
    }

    #[test]
    fn test_trigger_is_any_of_rules() {
        let trigger = Trigger {
            name: "on_cpu".into(),
            rules: vec![
                TriggerRule::AlertNameIn(vec!["HighCPUUsage".into()]),
                TriggerRule::MetricContains {
                    pattern: "cpu".into(),
                    min_value: Some(80.0),
                },
            ],
        };
        assert!(trigger.matches(&event(serde_json::json!({"alertname": "HighCPUUsage"}))));
        assert!(trigger.matches(&event(serde_json::json!({"metric": "cpu", "value": 90}))));
        assert!(!trigger.matches(&event(serde_json::json!({"alertname": "Other"}))));
    }

    #[test]
    fn test_run_finish_sets_duration() {
        let pb = Playbook::new("p", "d", vec![], vec![]);
        let mut run = PlaybookRun::new(&pb, Event::default());
        run.finish(RunStatus::Success);
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.completed_at.unwrap() >= run.started_at);
        assert!(run.duration_seconds.is_some());
    }
}
