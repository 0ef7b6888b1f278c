//! Rule-based fallback layer: stateless threshold evaluation. Always
//! succeeds and never calls any external service.

use std::collections::{BTreeMap, HashMap};

use crate::model::{MetricKind, MetricSample, MetricSnapshot, Severity};

use super::{AnalysisResult, Anomaly};

pub const ENGINE_TAG: &str = "rule-based";

/// Threshold tiers for one metric family. A `None` tier is not evaluated.
struct Thresholds {
    warning: Option<f64>,
    high: Option<f64>,
    critical: Option<f64>,
    unit: &'static str,
}

fn thresholds(kind: &MetricKind) -> Option<Thresholds> {
    match kind {
        MetricKind::Cpu => Some(Thresholds {
            warning: Some(70.0),
            high: Some(80.0),
            critical: Some(90.0),
            unit: "%",
        }),
        MetricKind::Memory => Some(Thresholds {
            warning: Some(400.0),
            high: None,
            critical: Some(480.0),
            unit: "MB",
        }),
        MetricKind::ErrorRate => Some(Thresholds {
            warning: Some(1.0),
            high: Some(5.0),
            critical: Some(10.0),
            unit: "%",
        }),
        MetricKind::Latency => Some(Thresholds {
            warning: Some(500.0),
            high: Some(1000.0),
            critical: Some(2000.0),
            unit: "ms",
        }),
        // Up is handled separately: the only breach is value == 0.
        MetricKind::Up | MetricKind::Other(_) => None,
    }
}

/// Anomaly score bands mirror the severity cutoffs the reasoning layer
/// reports (< -0.7 critical, < -0.5 high, < -0.3 medium).
fn score_for(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => -0.8,
        Severity::High => -0.6,
        Severity::Medium => -0.4,
        Severity::Low => -0.2,
    }
}

/// Evaluate one sample against the rule table. Severity is the highest
/// tier breached; reasoning states the literal value versus the threshold.
fn evaluate(sample: &MetricSample) -> Option<Anomaly> {
    if sample.kind == MetricKind::Up {
        if sample.value != 0.0 {
            return None;
        }
        return Some(anomaly_from(
            sample,
            Severity::Critical,
            0.0,
            "",
            format!("service-up flag is 0 -- `{}` is not responding", sample.service),
        ));
    }

    let t = thresholds(&sample.kind)?;
    let breached = |tier: Option<f64>| tier.filter(|threshold| sample.value > *threshold);
    let (severity, threshold) = if let Some(c) = breached(t.critical) {
        (Severity::Critical, c)
    } else if let Some(h) = breached(t.high) {
        (Severity::High, h)
    } else if let Some(w) = breached(t.warning) {
        (Severity::Medium, w)
    } else {
        return None;
    };

    Some(anomaly_from(
        sample,
        severity,
        threshold,
        t.unit,
        format!(
            "{} at {:.1}{} exceeds the {} threshold of {}{}",
            sample.kind, sample.value, t.unit, severity, threshold, t.unit
        ),
    ))
}

fn anomaly_from(
    sample: &MetricSample,
    severity: Severity,
    threshold: f64,
    unit: &str,
    reasoning: String,
) -> Anomaly {
    let mut details = BTreeMap::new();
    details.insert("threshold".to_string(), serde_json::json!(threshold));
    if !unit.is_empty() {
        details.insert("unit".to_string(), serde_json::json!(unit));
    }
    Anomaly {
        metric: sample.kind.clone(),
        service: sample.service.clone(),
        cluster: sample.cluster.clone(),
        value: sample.value,
        anomaly_score: score_for(severity),
        severity,
        timestamp: sample.timestamp,
        reasoning,
        details,
    }
}

/// Health score: `100 - 15*critical - 8*high - 3*medium`, floored at 0.
pub fn health_score(anomalies: &[Anomaly]) -> f64 {
    let mut score: f64 = 100.0;
    for a in anomalies {
        score -= match a.severity {
            Severity::Critical => 15.0,
            Severity::High => 8.0,
            Severity::Medium => 3.0,
            Severity::Low => 0.0,
        };
    }
    score.max(0.0)
}

/// Templated insights: 4 to 6 entries derived from the anomaly set.
pub fn insights(anomalies: &[Anomaly], data_points: usize) -> Vec<String> {
    let mut out = Vec::new();

    if anomalies.is_empty() {
        out.push("All systems operating normally - no anomalies detected".to_string());
        out.push(format!(
            "{data_points} data points evaluated against the rule table without a breach"
        ));
        out.push("Fleet health score at 100".to_string());
        out.push("No action required".to_string());
        return out;
    }

    let critical = anomalies
        .iter()
        .filter(|a| a.severity == Severity::Critical)
        .count();
    let high = anomalies
        .iter()
        .filter(|a| a.severity == Severity::High)
        .count();
    if critical > 0 {
        out.push(format!(
            "{critical} critical anomalies detected - immediate attention required"
        ));
    }
    if high > 0 {
        out.push(format!("{high} high-severity anomalies in the current snapshot"));
    }

    let mut by_service: HashMap<&str, usize> = HashMap::new();
    let mut by_cluster: HashMap<&str, usize> = HashMap::new();
    let mut by_metric: HashMap<&str, usize> = HashMap::new();
    for a in anomalies {
        *by_service.entry(a.service.as_str()).or_default() += 1;
        *by_cluster.entry(a.cluster.as_str()).or_default() += 1;
        *by_metric.entry(a.metric.as_str()).or_default() += 1;
    }

    if let Some((svc, n)) = by_service.iter().max_by_key(|(_, n)| **n) {
        if by_service.len() > 1 || *n > 1 {
            out.push(format!(
                "Service '{svc}' showing {n} anomalies - possible degradation"
            ));
        }
    }
    if by_cluster.len() > 1 {
        if let Some((cluster, _)) = by_cluster.iter().max_by_key(|(_, n)| **n) {
            out.push(format!(
                "Cluster '{cluster}' experiencing an elevated anomaly rate"
            ));
        }
    }

    // Dominant metric family, if one accounts for more than half the set.
    if let Some((metric, n)) = by_metric.iter().max_by_key(|(_, n)| **n) {
        if *n * 2 > anomalies.len() {
            let hint = match *metric {
                "cpu" => "possible resource exhaustion",
                "memory" => "potential memory leak or pressure",
                "latency" => "network or processing delays",
                "error_rate" => "application failures or invalid inputs",
                _ => "correlated degradation",
            };
            out.push(format!("{metric}-related anomalies dominant - {hint}"));
        }
    }

    out.push(format!(
        "Fleet health score at {:.0} across {data_points} data points",
        health_score(anomalies)
    ));

    // Contract: 4-6 entries.
    while out.len() < 4 {
        out.push("Review the anomaly list for per-service detail".to_string());
    }
    out.truncate(6);
    out
}

/// Run the full rule-based layer over a snapshot.
pub fn analyze(snapshot: &MetricSnapshot) -> AnalysisResult {
    let anomalies: Vec<Anomaly> = snapshot.samples.iter().filter_map(evaluate).collect();
    let score = health_score(&anomalies);
    let insights = insights(&anomalies, snapshot.len());
    AnalysisResult::assemble(
        anomalies,
        score,
        insights,
        ENGINE_TAG.to_string(),
        snapshot.len(),
    )
}

/// The well-formed result for an empty snapshot.
pub fn empty_result() -> AnalysisResult {
    AnalysisResult::assemble(
        Vec::new(),
        100.0,
        insights(&[], 0),
        ENGINE_TAG.to_string(),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(kind: MetricKind, value: f64) -> MetricSample {
        MetricSample {
            service: "vmagent".to_string(),
            cluster: "k8s-paas-scw-1".to_string(),
            kind,
            value,
            timestamp: Utc::now(),
        }
    }

    fn snapshot(samples: Vec<MetricSample>) -> MetricSnapshot {
        MetricSnapshot::new(samples)
    }

    #[test]
    fn test_all_below_thresholds_is_healthy() {
        let snap = snapshot(vec![
            sample(MetricKind::Cpu, 45.0),
            sample(MetricKind::Memory, 120.0),
            sample(MetricKind::ErrorRate, 0.2),
            sample(MetricKind::Latency, 80.0),
            sample(MetricKind::Up, 1.0),
        ]);
        let result = analyze(&snap);
        assert!(result.anomalies.is_empty());
        assert!(!result.anomalies_detected);
        assert_eq!(result.overall_health_score, 100.0);
        assert_eq!(result.data_points, 5);
        assert!(result.insights.len() >= 4 && result.insights.len() <= 6);
    }

    #[test]
    fn test_cpu_94_7_is_one_critical_with_score_85() {
        let snap = snapshot(vec![sample(MetricKind::Cpu, 94.7)]);
        let result = analyze(&snap);
        assert_eq!(result.anomalies.len(), 1);
        let a = &result.anomalies[0];
        assert_eq!(a.severity, Severity::Critical);
        assert!(a.reasoning.contains("94.7"));
        assert!(a.reasoning.contains("90"));
        assert_eq!(result.overall_health_score, 85.0);
        assert_eq!(result.engine, "rule-based");
    }

    #[test]
    fn test_severity_is_highest_tier_breached() {
        let snap = snapshot(vec![
            sample(MetricKind::Cpu, 75.0), // medium only
            sample(MetricKind::Cpu, 85.0), // high
        ]);
        let result = analyze(&snap);
        assert_eq!(result.anomalies[0].severity, Severity::Medium);
        assert_eq!(result.anomalies[1].severity, Severity::High);
    }

    #[test]
    fn test_memory_has_no_high_tier() {
        let snap = snapshot(vec![sample(MetricKind::Memory, 450.0)]);
        assert_eq!(analyze(&snap).anomalies[0].severity, Severity::Medium);
        let snap = snapshot(vec![sample(MetricKind::Memory, 490.0)]);
        assert_eq!(analyze(&snap).anomalies[0].severity, Severity::Critical);
    }

    #[test]
    fn test_service_up_flag_zero_is_critical() {
        let snap = snapshot(vec![sample(MetricKind::Up, 0.0)]);
        let result = analyze(&snap);
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].severity, Severity::Critical);
    }

    #[test]
    fn test_health_score_monotone_and_clamped() {
        let mut samples = Vec::new();
        let mut last = 100.0;
        for i in 0..10 {
            samples.push(sample(MetricKind::Cpu, 95.0 + i as f64 * 0.1));
            let score = analyze(&snapshot(samples.clone())).overall_health_score;
            assert!(score <= last);
            last = score;
        }
        // 10 criticals would be -150; clamped at 0
        assert_eq!(last, 0.0);
    }

    #[test]
    fn test_empty_snapshot_contract() {
        let result = empty_result();
        assert_eq!(result.data_points, 0);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.overall_health_score, 100.0);
        assert!(result.insights.len() >= 4);
    }

    #[test]
    fn test_unknown_metric_kinds_are_ignored() {
        let snap = snapshot(vec![sample(
            MetricKind::Other("queue_depth".to_string()),
            1e9,
        )]);
        assert!(analyze(&snap).anomalies.is_empty());
    }
}
