//! Investigation engine: ordered evidence phases, per-(service, cluster)
//! coalescing, and an in-memory registry of reports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{Event, MetricKind};
use crate::reasoning::{extract::extract_json, ReasoningBackend};
use crate::sources::{LogLevel, LogSource, MetricSource, OrchestrationSource};

use super::synthesis::{self, EvidenceView, Synthesis};
use super::{
    Confidence, Investigation, InvestigationStatus, EVIDENCE_WINDOW_SECS, LOG_EVIDENCE_LIMIT,
};

/// Metric families pulled as evidence, with the keys they land under in
/// `metric_evidence`.
const EVIDENCE_METRICS: &[(MetricKind, &str)] = &[
    (MetricKind::Cpu, "cpu_usage_pct"),
    (MetricKind::Memory, "memory_mb"),
    (MetricKind::Latency, "latency_ms"),
    (MetricKind::Up, "up"),
];

pub struct Investigator {
    metrics: Arc<dyn MetricSource>,
    logs: Arc<dyn LogSource>,
    orchestration: Option<Arc<dyn OrchestrationSource>>,
    reasoning: Option<Arc<dyn ReasoningBackend>>,
    reasoning_timeout: Duration,
    /// (service, cluster) -> in-flight investigation id.
    active: Mutex<HashMap<(String, String), String>>,
    /// All investigations, insertion order. Finished records replace their
    /// pending snapshots in place.
    registry: RwLock<Vec<Investigation>>,
}

impl Investigator {
    pub fn new(
        metrics: Arc<dyn MetricSource>,
        logs: Arc<dyn LogSource>,
        orchestration: Option<Arc<dyn OrchestrationSource>>,
        reasoning: Option<Arc<dyn ReasoningBackend>>,
        reasoning_timeout: Duration,
    ) -> Self {
        Self {
            metrics,
            logs,
            orchestration,
            reasoning,
            reasoning_timeout,
            active: Mutex::new(HashMap::new()),
            registry: RwLock::new(Vec::new()),
        }
    }

    fn new_id() -> String {
        format!(
            "inv-{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..6]
        )
    }

    /// Run a full investigation for an alert. An alert without a
    /// resolvable service fails immediately; a duplicate trigger for a
    /// service already under investigation returns the in-flight record
    /// instead of spawning a second one.
    pub async fn investigate(&self, alert: Event) -> Investigation {
        let Some(service) = alert.service().map(str::to_string) else {
            let mut inv = Investigation::new(Self::new_id(), alert);
            inv.root_cause =
                "Investigation failed: event carries no resolvable service".to_string();
            inv.findings = vec!["No service field present on the triggering event".to_string()];
            inv.confidence = Confidence::Low;
            inv.finish(InvestigationStatus::Failed);
            warn!(id = %inv.id, "investigation failed: unresolvable event");
            self.register(inv.clone());
            return inv;
        };
        let cluster = alert.cluster().to_string();

        // Check-and-insert under one lock so concurrent triggers for the
        // same pair cannot both start.
        let id = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let key = (service.clone(), cluster.clone());
            if let Some(existing) = active.get(&key).cloned() {
                info!(service = %service, cluster = %cluster, id = %existing,
                      "coalescing duplicate trigger into active investigation");
                if let Some(inv) = self.get(&existing) {
                    return inv;
                }
                // Stale entry with no registry record; replace it.
            }
            let id = Self::new_id();
            active.insert(key, id.clone());
            id
        };

        let mut inv = Investigation::new(id, alert.clone());
        inv.status = InvestigationStatus::Investigating;
        self.register(inv.clone());
        info!(id = %inv.id, service = %service, cluster = %cluster, "investigating");

        let window = Duration::from_secs(EVIDENCE_WINDOW_SECS);

        self.gather_metric_evidence(&mut inv, &service, &cluster, window)
            .await;
        self.gather_log_evidence(&mut inv, &service, window).await;
        self.gather_workload_context(&mut inv, &service, &cluster)
            .await;
        self.synthesize(&mut inv, &alert).await;

        inv.finish(InvestigationStatus::Complete);
        info!(
            id = %inv.id,
            confidence = %inv.confidence,
            "investigation complete: {}",
            inv.root_cause.chars().take(80).collect::<String>()
        );

        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(service, cluster));
        self.update(inv.clone());
        inv
    }

    // -- Phase 1: metrics -------------------------------------------------

    async fn gather_metric_evidence(
        &self,
        inv: &mut Investigation,
        service: &str,
        cluster: &str,
        window: Duration,
    ) {
        let query_desc = format!("cpu, memory, latency, up for job=\"{service}\" [last 5m]");
        let mut failures = 0;
        for (kind, key) in EVIDENCE_METRICS {
            match self.metrics.query(service, kind, cluster, window).await {
                Ok(points) => {
                    if let Some(last) = points.last() {
                        inv.metric_evidence.insert((*key).to_string(), last.value);
                    }
                }
                Err(e) => {
                    warn!(id = %inv.id, metric = %kind, error = %e, "metric evidence query failed");
                    failures += 1;
                }
            }
        }

        let result = if failures == EVIDENCE_METRICS.len() {
            "metrics source unavailable -- continuing without metric evidence".to_string()
        } else {
            format!(
                "CPU: {:.1}%  Memory: {:.0}MB  Up: {}",
                inv.metric_evidence.get("cpu_usage_pct").unwrap_or(&0.0),
                inv.metric_evidence.get("memory_mb").unwrap_or(&0.0),
                match inv.metric_evidence.get("up") {
                    Some(v) if *v == 1.0 => "yes",
                    Some(_) => "NO",
                    None => "unknown",
                }
            )
        };
        inv.add_step("metrics", query_desc, result);
    }

    // -- Phase 2: logs ----------------------------------------------------

    async fn gather_log_evidence(&self, inv: &mut Investigation, service: &str, window: Duration) {
        let query_desc = format!("{{job=\"{service}\"}} [last 5m, limit {LOG_EVIDENCE_LIMIT}]");
        match self.logs.query(service, window, LOG_EVIDENCE_LIMIT).await {
            Ok(lines) => {
                let error_count = lines.iter().filter(|l| l.level != LogLevel::Info).count();
                let result = format!(
                    "Found {} log lines ({} errors/warnings) in the window",
                    lines.len(),
                    error_count
                );
                inv.log_evidence = lines;
                inv.add_step("logs", query_desc, result);
            }
            Err(e) => {
                warn!(id = %inv.id, error = %e, "log evidence query failed");
                inv.add_step(
                    "logs",
                    query_desc,
                    format!("log source unavailable ({e}) -- continuing without log evidence"),
                );
            }
        }
    }

    // -- Phase 3: orchestration context -----------------------------------

    async fn gather_workload_context(
        &self,
        inv: &mut Investigation,
        service: &str,
        cluster: &str,
    ) {
        let query_desc = format!("describe workload app={service}");
        let Some(orch) = &self.orchestration else {
            inv.add_step(
                "orchestration",
                query_desc,
                "skipped: orchestration source not configured".to_string(),
            );
            return;
        };

        match orch.describe(service, cluster).await {
            Ok(Some(workload)) => {
                let result = format!(
                    "Pod status: {}  Restarts: {}  LastState: {}",
                    workload.status,
                    workload.restart_count(),
                    workload.last_state().unwrap_or("N/A")
                );
                inv.k8s_context = Some(workload);
                inv.add_step("orchestration", query_desc, result);
            }
            Ok(None) => {
                inv.add_step(
                    "orchestration",
                    query_desc,
                    "workload not found".to_string(),
                );
            }
            Err(e) => {
                warn!(id = %inv.id, error = %e, "orchestration describe failed");
                inv.add_step(
                    "orchestration",
                    query_desc,
                    format!("orchestration source unavailable ({e})"),
                );
            }
        }
    }

    // -- Phase 4: synthesis -----------------------------------------------

    async fn synthesize(&self, inv: &mut Investigation, alert: &Event) {
        inv.add_step(
            "synthesis",
            "analyze all gathered evidence".to_string(),
            "analyzing...".to_string(),
        );

        let view = EvidenceView {
            metric_evidence: &inv.metric_evidence,
            log_evidence: &inv.log_evidence,
            k8s_context: inv.k8s_context.as_ref(),
        };

        let synthesis = match &self.reasoning {
            Some(backend) => match self.reasoning_synthesis(backend.as_ref(), alert, &view).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(id = %inv.id, error = %e, "reasoning synthesis failed, using heuristics");
                    synthesis::synthesize(alert, &view)
                }
            },
            None => synthesis::synthesize(alert, &view),
        };

        inv.root_cause = synthesis.root_cause;
        inv.ai_summary = synthesis.ai_summary;
        inv.findings = synthesis.findings;
        inv.recommendations = synthesis.recommendations;
        inv.confidence = synthesis.confidence;

        if let Some(step) = inv.steps.last_mut() {
            step.result = format!("Root cause identified with {} confidence", inv.confidence);
        }
    }

    async fn reasoning_synthesis(
        &self,
        backend: &dyn ReasoningBackend,
        alert: &Event,
        view: &EvidenceView<'_>,
    ) -> anyhow::Result<Synthesis> {
        let prompt = build_synthesis_prompt(alert, view);
        let text = backend.complete(&prompt, self.reasoning_timeout).await?;
        let payload = extract_json(&text)
            .ok_or_else(|| anyhow::anyhow!("no JSON in synthesis response"))?;
        let raw: RawSynthesis = serde_json::from_str(payload)?;

        let confidence = Confidence::parse(&raw.confidence)
            .ok_or_else(|| anyhow::anyhow!("unknown confidence '{}'", raw.confidence))?;
        if raw.root_cause.trim().is_empty() {
            anyhow::bail!("synthesis response missing root cause");
        }
        Ok(Synthesis {
            root_cause: raw.root_cause,
            ai_summary: raw.summary,
            findings: raw.findings,
            recommendations: raw.recommendations,
            confidence,
        })
    }

    // -- Registry ---------------------------------------------------------

    fn register(&self, inv: Investigation) {
        self.registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(inv);
    }

    fn update(&self, inv: Investigation) {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        match registry.iter_mut().find(|i| i.id == inv.id) {
            Some(slot) => *slot = inv,
            None => registry.push(inv),
        }
    }

    pub fn get(&self, id: &str) -> Option<Investigation> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    /// Recent investigations, newest first.
    pub fn list(&self, limit: usize) -> Vec<Investigation> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.iter().rev().take(limit).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[derive(serde::Deserialize)]
struct RawSynthesis {
    root_cause: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    findings: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    confidence: String,
}

fn build_synthesis_prompt(alert: &Event, view: &EvidenceView<'_>) -> String {
    let mut prompt = String::from(
        "You are a root-cause analyst. Given the alert and evidence below, respond \
         with STRICT JSON only: {\"root_cause\": str, \"summary\": str (2-4 sentences), \
         \"findings\": [str], \"recommendations\": [str, ranked], \
         \"confidence\": \"low\"|\"medium\"|\"high\"}\n\nAlert:\n",
    );
    prompt.push_str(&serde_json::to_string_pretty(alert).unwrap_or_else(|_| "{}".to_string()));

    prompt.push_str("\n\nMetric evidence:\n");
    if view.metric_evidence.is_empty() {
        prompt.push_str("(none -- metrics source unavailable)\n");
    }
    for (k, v) in view.metric_evidence {
        prompt.push_str(&format!("- {k} = {v:.2}\n"));
    }

    prompt.push_str("\nLog evidence (newest first):\n");
    if view.log_evidence.is_empty() {
        prompt.push_str("(none -- log source returned nothing)\n");
    }
    for line in view.log_evidence.iter().take(30) {
        prompt.push_str(&format!("- {}\n", line.line));
    }

    if let Some(workload) = view.k8s_context {
        prompt.push_str(&format!(
            "\nWorkload context:\n{}\n",
            json!({
                "status": workload.status,
                "restarts": workload.restart_count(),
                "last_state": workload.last_state(),
                "warning_events": workload.events.len(),
            })
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricSnapshot;
    use crate::sources::{LogLine, MetricPoint, SourceError, WorkloadStatus};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubMetrics {
        cpu: f64,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetricSource for StubMetrics {
        async fn query(
            &self,
            _service: &str,
            metric: &MetricKind,
            _cluster: &str,
            _window: Duration,
        ) -> Result<Vec<MetricPoint>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError::Timeout);
            }
            let value = match metric {
                MetricKind::Cpu => self.cpu,
                MetricKind::Memory => 120.0,
                MetricKind::Latency => 40.0,
                MetricKind::Up => 1.0,
                _ => 0.0,
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

    struct StubLogs {
        lines: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl LogSource for StubLogs {
        async fn query(
            &self,
            _service: &str,
            _window: Duration,
            _limit: usize,
        ) -> Result<Vec<LogLine>, SourceError> {
            Ok(self
                .lines
                .iter()
                .map(|l| LogLine {
                    timestamp: Utc::now(),
                    line: l.to_string(),
                    level: LogLevel::classify(None, l),
                    labels: BTreeMap::new(),
                })
                .collect())
        }
    }

    struct StubOrch;

    #[async_trait::async_trait]
    impl OrchestrationSource for StubOrch {
        async fn describe(
            &self,
            service: &str,
            _cluster: &str,
        ) -> Result<Option<WorkloadStatus>, SourceError> {
            Ok(Some(WorkloadStatus {
                name: format!("{service}-0"),
                namespace: "default".to_string(),
                status: "Running".to_string(),
                containers: vec![],
                events: vec![],
            }))
        }
    }

    fn investigator(cpu: f64, metrics_fail: bool, log_lines: Vec<&'static str>) -> Investigator {
        Investigator::new(
            Arc::new(StubMetrics {
                cpu,
                fail: metrics_fail,
                calls: AtomicUsize::new(0),
            }),
            Arc::new(StubLogs { lines: log_lines }),
            Some(Arc::new(StubOrch)),
            None,
            Duration::from_secs(5),
        )
    }

    fn alert() -> Event {
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

    #[tokio::test]
    async fn test_full_investigation_completes() {
        let engine = investigator(94.7, false, vec!["WARN cpu throttling on node"]);
        let inv = engine.investigate(alert()).await;
        assert_eq!(inv.status, InvestigationStatus::Complete);
        assert!(inv.completed_at.unwrap() >= inv.started_at);
        assert!(inv.duration_seconds.is_some());
        // four phases, four steps
        assert_eq!(inv.steps.len(), 4);
        assert!(inv.root_cause.contains("CPU exhaustion"));
        assert_eq!(inv.confidence, Confidence::High);
        assert!(inv.k8s_context.is_some());
    }

    #[tokio::test]
    async fn test_unresolvable_alert_fails() {
        let engine = investigator(10.0, false, vec![]);
        let inv = engine
            .investigate(serde_json::from_str("{\"alertname\":\"X\"}").unwrap())
            .await;
        assert_eq!(inv.status, InvestigationStatus::Failed);
        assert!(inv.root_cause.contains("no resolvable service"));
        assert!(inv.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_metric_failure_degrades_not_fails() {
        let engine = investigator(0.0, true, vec!["ERROR connection timeout to downstream"]);
        let inv = engine.investigate(alert()).await;
        assert_eq!(inv.status, InvestigationStatus::Complete);
        assert!(inv.metric_evidence.is_empty());
        assert!(inv.steps[0].result.contains("unavailable"));
        // only the log source returned data
        assert_eq!(inv.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_duplicate_trigger_coalesces() {
        let engine = Arc::new(investigator(94.7, false, vec![]));
        // Seed an active entry as if an investigation is in flight.
        let inv = Investigation::new("inv-held".to_string(), alert());
        engine.register(inv);
        engine
            .active
            .lock()
            .unwrap()
            .insert(("vmagent".to_string(), "k8s-paas-scw-1".to_string()),
                "inv-held".to_string());

        let second = engine.investigate(alert()).await;
        assert_eq!(second.id, "inv-held");
        assert_eq!(engine.count(), 1);
    }

    #[tokio::test]
    async fn test_registry_lists_newest_first() {
        let engine = investigator(10.0, false, vec![]);
        let a = engine.investigate(alert()).await;
        let b = engine.investigate(alert()).await;
        let listed = engine.list(10);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
        assert!(engine.get(&a.id).is_some());
        assert!(engine.get("nope").is_none());
    }
}
