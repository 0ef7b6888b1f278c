//! Deterministic synthesis: pattern heuristics over gathered evidence,
//! used whenever the reasoning backend is unavailable or unparseable.

use crate::model::Event;
use crate::sources::{LogLevel, LogLine, WorkloadStatus};

use super::Confidence;

/// Output of either synthesis path.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub root_cause: String,
    pub ai_summary: String,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: Confidence,
}

/// Evidence digest handed to synthesis.
pub struct EvidenceView<'a> {
    pub metric_evidence: &'a std::collections::BTreeMap<String, f64>,
    pub log_evidence: &'a [LogLine],
    pub k8s_context: Option<&'a WorkloadStatus>,
}

impl EvidenceView<'_> {
    fn metric(&self, key: &str) -> f64 {
        self.metric_evidence.get(key).copied().unwrap_or(0.0)
    }

    fn error_lines(&self) -> Vec<&LogLine> {
        self.log_evidence
            .iter()
            .filter(|l| l.level != LogLevel::Info)
            .collect()
    }

    fn lines_matching(&self, keywords: &[&str]) -> usize {
        self.log_evidence
            .iter()
            .filter(|l| {
                let upper = l.line.to_ascii_uppercase();
                keywords.iter().any(|kw| upper.contains(kw))
            })
            .count()
    }

    fn restarts(&self) -> u32 {
        self.k8s_context.map(|k| k.restart_count()).unwrap_or(0)
    }

    fn last_state(&self) -> Option<&str> {
        self.k8s_context.and_then(|k| k.last_state())
    }
}

/// Does the metric evidence independently corroborate the alerted metric
/// family (a breached healthy range for that family)?
fn metrics_corroborate(alert_metric: &str, ev: &EvidenceView) -> bool {
    match alert_metric {
        m if m.contains("cpu") => ev.metric("cpu_usage_pct") > 70.0,
        m if m.contains("memory") => ev.metric("memory_mb") > 400.0,
        m if m.contains("latency") => ev.metric("latency_ms") > 500.0,
        m if m.contains("error") => ev.metric("error_rate") > 1.0,
        m if m.contains("up") || m.contains("down") => {
            ev.metric_evidence.contains_key("up") && ev.metric("up") == 0.0
        }
        _ => false,
    }
}

/// Do the logs independently corroborate the alerted metric family?
fn logs_corroborate(alert_metric: &str, ev: &EvidenceView) -> bool {
    match alert_metric {
        m if m.contains("cpu") => ev.lines_matching(&["CPU", "THROTTL"]) > 0,
        m if m.contains("memory") => ev.lines_matching(&["OOM", "MEMORY", "HEAP"]) > 0,
        m if m.contains("latency") => ev.lines_matching(&["TIMEOUT", "DEADLINE", "SLOW"]) > 0,
        m if m.contains("error") => !ev.error_lines().is_empty(),
        m if m.contains("up") || m.contains("down") => {
            ev.lines_matching(&["503", "REFUSED", "FAIL"]) > 0
        }
        _ => !ev.error_lines().is_empty(),
    }
}

/// Deterministic confidence: both sources corroborate the alerted metric
/// -> high; exactly one source returned any data -> low; otherwise medium.
pub fn derive_confidence(alert: &Event, ev: &EvidenceView) -> Confidence {
    let metric = alert.metric();
    let have_metrics = !ev.metric_evidence.is_empty();
    let have_logs = !ev.log_evidence.is_empty();

    if have_metrics
        && have_logs
        && metrics_corroborate(metric, ev)
        && logs_corroborate(metric, ev)
    {
        return Confidence::High;
    }
    if have_metrics != have_logs {
        return Confidence::Low;
    }
    Confidence::Medium
}

/// Rule-based root-cause synthesis, in decreasing order of specificity:
/// OOM kill, service down, CPU exhaustion, dependency timeouts, then a
/// generic baseline deviation.
pub fn synthesize(alert: &Event, ev: &EvidenceView) -> Synthesis {
    let service = alert.service().unwrap_or("unknown");
    let alertname = alert.alertname();
    let cpu = ev.metric("cpu_usage_pct");
    let mem = ev.metric("memory_mb");
    let up = ev.metric("up");
    let error_count = ev.error_lines().len();
    let oom_lines = ev.lines_matching(&["OOM", "OOMKILL", "KILLED"]);
    let timeout_lines = ev.lines_matching(&["TIMEOUT", "DEADLINE", "CONNECTION REFUSED"]);
    let restarts = ev.restarts();

    let (root_cause, findings, recommendations);

    if oom_lines > 0 || ev.last_state() == Some("OOMKilled") || (mem > 450.0 && restarts > 0) {
        root_cause = format!(
            "OOMKill -- `{service}` exceeded its memory limit and was killed. \
             Evidence: {oom_lines} OOM log entries, {restarts} restart(s), memory at {mem:.0}MB."
        );
        findings = vec![
            format!("Container `{service}` was OOMKilled -- {restarts} restart(s) recorded"),
            format!("Memory at {mem:.0}MB, approaching or exceeding the container limit"),
            format!("{oom_lines} OOM-related log entries in the investigation window"),
        ];
        recommendations = vec![
            "Increase the memory limit in the workload spec".to_string(),
            "Profile the heap for unbounded caches or data accumulation".to_string(),
            "Add an autoscaler keyed on memory so the next kill is prevented".to_string(),
            "Alert at 80% of the memory limit".to_string(),
        ];
    } else if up == 0.0 && ev.metric_evidence.contains_key("up")
        || matches!(alertname, "ServiceDown" | "InstanceDown")
    {
        root_cause = format!(
            "`{service}` is not responding to health checks (up=0). \
             {error_count} errors in logs; {restarts} restart(s)."
        );
        findings = vec![
            format!("`{service}` health check failing -- up metric is 0"),
            format!("{error_count} error log entries in the investigation window"),
            format!("Workload restart count: {restarts}"),
        ];
        recommendations = vec![
            "Check workload phase and recent terminations".to_string(),
            "Inspect startup logs from the previous container instance".to_string(),
            "Verify configuration and secrets are mounted correctly".to_string(),
            "Test downstream dependency health".to_string(),
        ];
    } else if cpu > 80.0 {
        root_cause = format!(
            "CPU exhaustion -- `{service}` consuming {cpu:.0}% CPU. \
             Performance degradation likely; {error_count} errors observed."
        );
        findings = vec![
            format!("CPU at {cpu:.0}% -- significantly above the 70% healthy threshold"),
            format!("Memory at {mem:.0}MB (secondary indicator)"),
            format!("{error_count} error log entries -- some may stem from CPU starvation"),
        ];
        recommendations = vec![
            "Scale horizontally to spread the load".to_string(),
            "Enable an autoscaler keyed on CPU".to_string(),
            "Profile CPU hotspots in the running process".to_string(),
            "Review recent changes for tight loops or blocking I/O".to_string(),
        ];
    } else if timeout_lines > 0 {
        root_cause = format!(
            "Dependency failure -- `{service}` cannot reach downstream services \
             ({timeout_lines} timeout errors in logs)."
        );
        findings = vec![
            format!("{timeout_lines} connection timeout / deadline exceeded errors in logs"),
            format!("Service itself is up (CPU {cpu:.1}%, memory {mem:.0}MB) -- issue is external"),
            format!("{error_count} total errors; the majority are connection-related"),
        ];
        recommendations = vec![
            "Check downstream service health".to_string(),
            "Verify network policies and DNS resolution".to_string(),
            "Add retry with backoff and a circuit breaker to prevent cascade".to_string(),
            "Check whether a dependency shipped a breaking change".to_string(),
        ];
    } else {
        root_cause = format!(
            "Anomalous behaviour detected in `{service}` -- metrics deviate from baseline. \
             Requires deeper investigation."
        );
        findings = vec![
            format!("CPU {cpu:.1}%, memory {mem:.0}MB, up: {}", if up == 0.0 { "no" } else { "yes" }),
            format!("{error_count} error log entries in the investigation window"),
            format!("Alert `{alertname}` (severity: {})", alert.severity.as_deref().unwrap_or("unknown")),
        ];
        recommendations = vec![
            "Compare metrics against the 24h baseline".to_string(),
            "Check for recent deployments to this service".to_string(),
            "Enable debug logging temporarily for deeper visibility".to_string(),
            "Review correlated dashboards and infra changes".to_string(),
        ];
    }

    let confidence = derive_confidence(alert, ev);
    let ai_summary = build_summary(service, &root_cause, ev, error_count, restarts, confidence);

    Synthesis {
        root_cause,
        ai_summary,
        findings,
        recommendations,
        confidence,
    }
}

fn build_summary(
    service: &str,
    root_cause: &str,
    ev: &EvidenceView,
    error_count: usize,
    restarts: u32,
    confidence: Confidence,
) -> String {
    format!(
        "Investigation summary for `{service}`: {root_cause} Evidence shows CPU at {:.1}%, \
         memory at {:.0}MB, {error_count} error log entries, {restarts} restart(s). \
         Confidence: {}.",
        ev.metric("cpu_usage_pct"),
        ev.metric("memory_mb"),
        confidence.as_str().to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn log(line: &str) -> LogLine {
        LogLine {
            timestamp: Utc::now(),
            line: line.to_string(),
            level: LogLevel::classify(None, line),
            labels: BTreeMap::new(),
        }
    }

    fn alert(metric: &str) -> Event {
        serde_json::from_value(serde_json::json!({
            "alertname": "HighCPUUsage",
            "service": "vmagent",
            "cluster": "k8s-paas-scw-1",
            "metric": metric,
            "severity": "critical"
        }))
        .unwrap()
    }

    #[test]
    fn test_oom_pattern_wins_over_cpu() {
        let metrics: BTreeMap<String, f64> =
            [("cpu_usage_pct".to_string(), 95.0), ("memory_mb".to_string(), 470.0)].into();
        let logs = vec![log("ERROR OOMKill signal received, container exceeded limit")];
        let ev = EvidenceView {
            metric_evidence: &metrics,
            log_evidence: &logs,
            k8s_context: None,
        };
        let s = synthesize(&alert("memory"), &ev);
        assert!(s.root_cause.starts_with("OOMKill"));
    }

    #[test]
    fn test_cpu_exhaustion_branch() {
        let metrics: BTreeMap<String, f64> = [
            ("cpu_usage_pct".to_string(), 94.7),
            ("memory_mb".to_string(), 120.0),
            ("up".to_string(), 1.0),
        ]
        .into();
        let logs = vec![log("WARN cpu throttling detected on worker")];
        let ev = EvidenceView {
            metric_evidence: &metrics,
            log_evidence: &logs,
            k8s_context: None,
        };
        let s = synthesize(&alert("cpu"), &ev);
        assert!(s.root_cause.contains("CPU exhaustion"));
        // both sources corroborate the cpu metric
        assert_eq!(s.confidence, Confidence::High);
    }

    #[test]
    fn test_single_source_means_low_confidence() {
        let metrics: BTreeMap<String, f64> = [("cpu_usage_pct".to_string(), 94.7)].into();
        let logs: Vec<LogLine> = vec![];
        let ev = EvidenceView {
            metric_evidence: &metrics,
            log_evidence: &logs,
            k8s_context: None,
        };
        assert_eq!(derive_confidence(&alert("cpu"), &ev), Confidence::Low);
    }

    #[test]
    fn test_uncorroborated_sources_mean_medium() {
        let metrics: BTreeMap<String, f64> = [("cpu_usage_pct".to_string(), 20.0)].into();
        let logs = vec![log("INFO request served")];
        let ev = EvidenceView {
            metric_evidence: &metrics,
            log_evidence: &logs,
            k8s_context: None,
        };
        assert_eq!(derive_confidence(&alert("cpu"), &ev), Confidence::Medium);
    }

    #[test]
    fn test_no_evidence_baseline_branch() {
        let metrics = BTreeMap::new();
        let logs: Vec<LogLine> = vec![];
        let ev = EvidenceView {
            metric_evidence: &metrics,
            log_evidence: &logs,
            k8s_context: None,
        };
        let s = synthesize(&alert("cpu"), &ev);
        assert!(s.root_cause.contains("deviate from baseline"));
        assert_eq!(s.confidence, Confidence::Medium);
    }
}
