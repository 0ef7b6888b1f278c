//! Event router and playbook executor.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::investigate::engine::Investigator;
use crate::investigate::InvestigationStatus;
use crate::model::Event;
use crate::notify::Notifier;

use super::{
    Action, ActionKind, ActionRecord, Playbook, PlaybookRun, RemediationHook, RunStatus,
};

/// Bound on the in-memory event/run ledgers.
const LEDGER_CAP: usize = 500;

pub struct PlaybookEngine {
    playbooks: RwLock<Vec<Playbook>>,
    runs: RwLock<Vec<PlaybookRun>>,
    events: RwLock<Vec<Event>>,
    investigator: Arc<Investigator>,
    notifier: Arc<dyn Notifier>,
    remediation: Option<Arc<dyn RemediationHook>>,
    channel: String,
}

impl PlaybookEngine {
    pub fn new(
        playbooks: Vec<Playbook>,
        investigator: Arc<Investigator>,
        notifier: Arc<dyn Notifier>,
        remediation: Option<Arc<dyn RemediationHook>>,
        channel: &str,
    ) -> Self {
        for pb in &playbooks {
            info!(playbook = %pb.name, "registered playbook");
        }
        Self {
            playbooks: RwLock::new(playbooks),
            runs: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            investigator,
            notifier,
            remediation,
            channel: channel.to_string(),
        }
    }

    pub fn register(&self, playbook: Playbook) {
        let mut playbooks = self.playbooks.write().unwrap_or_else(|e| e.into_inner());
        info!(playbook = %playbook.name, "registered playbook");
        playbooks.push(playbook);
    }

    /// Route an event to every matching playbook and execute them,
    /// returning one run record per match. No match returns an empty list
    /// (surfaced, not silent: the caller sees `playbooks_triggered = 0`).
    pub async fn dispatch(&self, event: Event) -> Vec<PlaybookRun> {
        {
            let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
            events.push(event.clone());
            if events.len() > LEDGER_CAP {
                events.remove(0);
            }
        }

        let matching: Vec<Playbook> = {
            let playbooks = self.playbooks.read().unwrap_or_else(|e| e.into_inner());
            playbooks
                .iter()
                .filter(|pb| pb.matches(&event))
                .cloned()
                .collect()
        };

        if matching.is_empty() {
            info!(alertname = %event.alertname(), "no playbooks matched event");
            return Vec::new();
        }

        let mut runs = Vec::with_capacity(matching.len());
        for playbook in matching {
            let run = self.run_playbook(&playbook, event.clone()).await;

            // run_count increments are serialized behind the registry lock.
            {
                let mut playbooks = self.playbooks.write().unwrap_or_else(|e| e.into_inner());
                if let Some(pb) = playbooks.iter_mut().find(|pb| pb.id == playbook.id) {
                    pb.run_count += 1;
                    pb.last_run = Some(Utc::now());
                }
            }
            {
                let mut ledger = self.runs.write().unwrap_or_else(|e| e.into_inner());
                ledger.push(run.clone());
                if ledger.len() > LEDGER_CAP {
                    ledger.remove(0);
                }
            }
            runs.push(run);
        }
        runs
    }

    async fn run_playbook(&self, playbook: &Playbook, event: Event) -> PlaybookRun {
        let mut run = PlaybookRun::new(playbook, event.clone());
        info!(playbook = %playbook.name, run = %run.id, "executing playbook");

        let mut failed_actions = 0;
        for action in &playbook.actions {
            let (result, failed) = self
                .execute_action(action, playbook.auto_remediate, &event, &mut run)
                .await;
            if failed {
                failed_actions += 1;
                warn!(playbook = %playbook.name, action = %action.name, %result, "action failed");
            }
            run.actions_taken.push(ActionRecord {
                action: action.name.clone(),
                kind: action.kind,
                description: action.description.clone(),
                result,
                timestamp: Utc::now(),
            });
        }

        // Failed only when every action failed; partial failures degrade,
        // they do not abort.
        let status = if !playbook.actions.is_empty() && failed_actions == playbook.actions.len() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        run.finish(status);
        info!(
            playbook = %playbook.name,
            run = %run.id,
            status = ?run.status,
            actions = run.actions_taken.len(),
            "playbook finished"
        );
        run
    }

    /// Execute one action; returns the record text and whether it failed.
    /// Never retries within the same run.
    async fn execute_action(
        &self,
        action: &Action,
        auto_remediate: bool,
        event: &Event,
        run: &mut PlaybookRun,
    ) -> (String, bool) {
        match action.kind {
            ActionKind::Investigate => {
                let inv = self.investigator.investigate(event.clone()).await;
                run.investigation_id = Some(inv.id.clone());
                if inv.status == InvestigationStatus::Failed {
                    return (
                        format!("investigation {} failed: {}", inv.id, inv.root_cause),
                        true,
                    );
                }
                run.enrichment
                    .insert("root_cause".to_string(), json!(inv.root_cause));
                run.enrichment
                    .insert("summary".to_string(), json!(inv.ai_summary));
                run.enrichment
                    .insert("findings".to_string(), json!(inv.findings));
                run.enrichment
                    .insert("confidence".to_string(), json!(inv.confidence.as_str()));
                (
                    format!(
                        "investigation {} complete (confidence: {}): {}",
                        inv.id,
                        inv.confidence,
                        inv.root_cause.chars().take(80).collect::<String>()
                    ),
                    false,
                )
            }

            ActionKind::Notify => {
                let message = self.build_notification(event, run);
                match self.notifier.send(&self.channel, &message).await {
                    Ok(()) => (
                        format!("alert dispatched to {} with enriched context", self.channel),
                        false,
                    ),
                    Err(e) => (format!("notification failed: {e}"), true),
                }
            }

            ActionKind::Remediate => {
                if !auto_remediate {
                    return ("skipped: auto_remediate disabled".to_string(), false);
                }
                let Some(hook) = &self.remediation else {
                    return ("failed: remediation hook not configured".to_string(), true);
                };
                match hook.remediate(event).await {
                    Ok(outcome) => (format!("remediation requested: {outcome}"), false),
                    Err(e) => (format!("remediation failed: {e}"), true),
                }
            }
        }
    }

    fn build_notification(&self, event: &Event, run: &PlaybookRun) -> String {
        let mut message = format!(
            "[{}] {} on {}/{}",
            event.severity.as_deref().unwrap_or("info"),
            event.alertname(),
            event.cluster(),
            event.service().unwrap_or("unknown"),
        );
        if let Some(root_cause) = run.enrichment.get("root_cause").and_then(|v| v.as_str()) {
            let confidence = run
                .enrichment
                .get("confidence")
                .and_then(|v| v.as_str())
                .unwrap_or("medium");
            message.push_str(&format!(
                " -- root cause ({confidence} confidence): {root_cause}"
            ));
        } else if let Some(desc) = &event.description {
            message.push_str(&format!(" -- {desc}"));
        }
        message
    }

    // -- Accessors --------------------------------------------------------

    pub fn list_playbooks(&self) -> Vec<Playbook> {
        self.playbooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Recent runs, newest first.
    pub fn list_runs(&self, limit: usize) -> Vec<PlaybookRun> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.iter().rev().take(limit).cloned().collect()
    }

    /// Recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricKind, MetricSnapshot};
    use crate::notify::NotifyError;
    use crate::playbook::{builtin, RemediateError, Trigger, TriggerRule};
    use crate::sources::{
        LogLine, LogSource, MetricPoint, MetricSource, SourceError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubMetrics;

    #[async_trait::async_trait]
    impl MetricSource for StubMetrics {
        async fn query(
            &self,
            _service: &str,
            metric: &MetricKind,
            _cluster: &str,
            _window: Duration,
        ) -> Result<Vec<MetricPoint>, SourceError> {
            let value = match metric {
                MetricKind::Cpu => 94.7,
                MetricKind::Up => 1.0,
                _ => 100.0,
            };
            Ok(vec![MetricPoint {
                timestamp: Utc::now(),
                value,
            }])
        }

        async fn scrape_fleet(&self) -> Result<MetricSnapshot, SourceError> {
            Ok(MetricSnapshot::new(vec![]))
        }
    }

    struct StubLogs;

    #[async_trait::async_trait]
    impl LogSource for StubLogs {
        async fn query(
            &self,
            _service: &str,
            _window: Duration,
            _limit: usize,
        ) -> Result<Vec<LogLine>, SourceError> {
            let line = "WARN cpu throttling detected";
            Ok(vec![LogLine {
                timestamp: Utc::now(),
                line: line.to_string(),
                level: crate::sources::LogLevel::classify(None, line),
                labels: Default::default(),
            }])
        }
    }

    /// Notifier that fails on selected calls (1-indexed).
    struct FlakyNotifier {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait::async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, _channel: &str, _message: &str) -> Result<(), NotifyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&n) {
                Err(NotifyError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    struct StubRemediation;

    #[async_trait::async_trait]
    impl RemediationHook for StubRemediation {
        async fn remediate(&self, _event: &Event) -> Result<String, RemediateError> {
            Ok("replicas scaled".to_string())
        }
    }

    fn investigator() -> Arc<Investigator> {
        Arc::new(Investigator::new(
            Arc::new(StubMetrics),
            Arc::new(StubLogs),
            None,
            None,
            Duration::from_secs(5),
        ))
    }

    fn engine_with(playbooks: Vec<Playbook>, notifier: Arc<dyn Notifier>) -> PlaybookEngine {
        PlaybookEngine::new(
            playbooks,
            investigator(),
            notifier,
            Some(Arc::new(StubRemediation)),
            "#platform-alerts",
        )
    }

    fn cpu_event() -> Event {
        serde_json::from_value(serde_json::json!({
            "alertname": "HighCPUUsage",
            "service": "vmagent",
            "cluster": "k8s-paas-scw-1",
            "severity": "critical",
            "metric": "cpu",
            "value": 94.7
        }))
        .unwrap()
    }

    fn notify_only_playbook(n_actions: usize) -> Playbook {
        let actions = (0..n_actions)
            .map(|i| Action::new(&format!("notify_{i}"), "send", ActionKind::Notify))
            .collect();
        Playbook::new(
            "notify_chain",
            "test",
            vec![Trigger {
                name: "always".to_string(),
                rules: vec![TriggerRule::AlertNameIn(vec!["HighCPUUsage".to_string()])],
            }],
            actions,
        )
    }

    #[tokio::test]
    async fn test_dispatch_runs_matching_playbooks_independently() {
        let engine = engine_with(
            builtin::defaults(),
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
            }),
        );
        let runs = engine.dispatch(cpu_event()).await;
        // on_high_cpu and on_critical_alert both match
        assert_eq!(runs.len(), 2);
        for run in &runs {
            assert_eq!(run.status, RunStatus::Success);
            assert!(run.investigation_id.is_some());
            assert!(run.enrichment.contains_key("root_cause"));
            assert!(run.completed_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_run_successful() {
        let engine = engine_with(
            vec![notify_only_playbook(3)],
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_on: vec![2],
            }),
        );
        let runs = engine.dispatch(cpu_event()).await;
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        // all three actions recorded, middle one failed
        assert_eq!(run.actions_taken.len(), 3);
        assert!(run.actions_taken[1].result.contains("failed"));
        assert_eq!(run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_all_actions_failing_fails_the_run() {
        let engine = engine_with(
            vec![notify_only_playbook(2)],
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_on: vec![1, 2],
            }),
        );
        let runs = engine.dispatch(cpu_event()).await;
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].actions_taken.len(), 2);
    }

    #[tokio::test]
    async fn test_remediate_skipped_without_auto_flag() {
        let mut pb = notify_only_playbook(0);
        pb.actions = vec![Action::new("scale", "scale up", ActionKind::Remediate)];
        // auto_remediate stays false
        let engine = engine_with(
            vec![pb],
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
            }),
        );
        let runs = engine.dispatch(cpu_event()).await;
        let record = &runs[0].actions_taken[0];
        assert_eq!(record.result, "skipped: auto_remediate disabled");
        assert_eq!(runs[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_remediate_executes_with_auto_flag() {
        let mut pb = notify_only_playbook(0);
        pb.actions = vec![Action::new("scale", "scale up", ActionKind::Remediate)];
        let pb = pb.auto_remediate();
        let engine = engine_with(
            vec![pb],
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
            }),
        );
        let runs = engine.dispatch(cpu_event()).await;
        assert!(runs[0].actions_taken[0].result.contains("replicas scaled"));
    }

    #[tokio::test]
    async fn test_no_match_returns_empty() {
        let engine = engine_with(
            builtin::defaults(),
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
            }),
        );
        let ev: Event =
            serde_json::from_value(serde_json::json!({"alertname": "Nothing", "severity": "warning"}))
                .unwrap();
        let runs = engine.dispatch(ev).await;
        assert!(runs.is_empty());
        // the event is still recorded for audit
        assert_eq!(engine.recent_events(10).len(), 1);
    }

    #[tokio::test]
    async fn test_run_counters_updated() {
        let engine = engine_with(
            builtin::defaults(),
            Arc::new(FlakyNotifier {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
            }),
        );
        engine.dispatch(cpu_event()).await;
        let high_cpu = engine
            .list_playbooks()
            .into_iter()
            .find(|pb| pb.name == "on_high_cpu")
            .unwrap();
        assert_eq!(high_cpu.run_count, 1);
        assert!(high_cpu.last_run.is_some());
        assert_eq!(engine.list_runs(10).len(), 2);
    }
}
