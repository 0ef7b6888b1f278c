//! The analysis cycle: cron-gated fleet scrape -> detector -> promotion of
//! critical/high anomalies into dispatched events.

use std::str::FromStr;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use cron::Schedule as CronSchedule;
use serde_json::json;
use tracing::{error, info, warn};

use crate::detect::engine::AnomalyDetector;
use crate::detect::{AnalysisResult, Anomaly};
use crate::investigate::engine::Investigator;
use crate::model::{Event, Severity};
use crate::playbook::engine::PlaybookEngine;
use crate::playbook::PlaybookRun;
use crate::sources::MetricSource;
use crate::storage::{self, Pool};

/// Latest published analysis, shared with the API.
#[derive(Default)]
pub struct AnalysisCell {
    latest: RwLock<Option<AnalysisResult>>,
}

impl AnalysisCell {
    pub fn publish(&self, result: AnalysisResult) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(result);
    }

    pub fn latest(&self) -> Option<AnalysisResult> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Everything one analysis cycle needs.
pub struct Pipeline {
    pub metrics: Arc<dyn MetricSource>,
    pub detector: Arc<AnomalyDetector>,
    pub playbooks: Arc<PlaybookEngine>,
    pub investigator: Arc<Investigator>,
    pub cell: Arc<AnalysisCell>,
    pub pool: Option<Pool>,
    pub auto_trigger_severity: Severity,
}

impl Pipeline {
    /// Scrape, analyze, publish, and promote anomalies. One cycle.
    pub async fn run_cycle(&self) {
        let snapshot = match self.metrics.scrape_fleet().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "fleet scrape failed, skipping analysis cycle");
                return;
            }
        };

        let result = self.detector.analyze(&snapshot).await;
        let promotable: Vec<Anomaly> = result
            .anomalies
            .iter()
            .filter(|a| a.severity >= self.auto_trigger_severity)
            .cloned()
            .collect();
        self.cell.publish(result);

        for anomaly in promotable {
            let event = anomaly_event(&anomaly);
            info!(
                service = %anomaly.service,
                severity = %anomaly.severity,
                "promoting anomaly to event"
            );
            self.dispatch(event).await;
        }
    }

    /// Dispatch an event and mirror the outcome to the ledger.
    pub async fn dispatch(&self, event: Event) -> Vec<PlaybookRun> {
        if let Some(pool) = &self.pool {
            storage::save_event(pool, &event);
        }
        let runs = self.playbooks.dispatch(event).await;
        if let Some(pool) = &self.pool {
            for run in &runs {
                storage::save_run(pool, run);
                if let Some(inv_id) = &run.investigation_id {
                    if let Some(inv) = self.investigator.get(inv_id) {
                        storage::save_investigation(pool, &inv);
                    }
                }
            }
        }
        runs
    }
}

/// Promote one anomaly into the inbound event shape.
pub fn anomaly_event(anomaly: &Anomaly) -> Event {
    Event {
        alertname: Some("AnomalyDetected".to_string()),
        source: Some("detector".to_string()),
        service: Some(anomaly.service.clone()),
        cluster: Some(anomaly.cluster.clone()),
        severity: Some(anomaly.severity.as_str().to_string()),
        metric: Some(anomaly.metric.as_str().to_string()),
        value: Some(json!(anomaly.value)),
        description: Some(anomaly.reasoning.clone()),
        extra: Default::default(),
    }
}

/// Background loop: sleep until the next cron occurrence, then run a
/// cycle. Never dies; a broken cron expression is reported once and the
/// loop falls back to a fixed five-minute cadence.
pub async fn run_analysis_loop(pipeline: Arc<Pipeline>, cron_expr: String) {
    let schedule = match CronSchedule::from_str(&cron_expr) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(cron = %cron_expr, error = %e, "invalid analysis cron, using 5m interval");
            None
        }
    };

    info!(cron = %cron_expr, "analysis loop started");
    loop {
        let sleep_for = match &schedule {
            Some(s) => s
                .upcoming(Utc)
                .next()
                .and_then(|next| (next - Utc::now()).to_std().ok())
                .unwrap_or(std::time::Duration::from_secs(300)),
            None => std::time::Duration::from_secs(300),
        };
        tokio::time::sleep(sleep_for).await;
        pipeline.run_cycle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricKind, MetricSample, MetricSnapshot};
    use crate::notify::{Notifier, NotifyError};
    use crate::playbook::builtin;
    use crate::sources::{LogLine, LogSource, MetricPoint, SourceError};
    use std::time::Duration;

    struct FleetMetrics {
        cpu: f64,
    }

    #[async_trait::async_trait]
    impl MetricSource for FleetMetrics {
        async fn query(
            &self,
            _service: &str,
            metric: &MetricKind,
            _cluster: &str,
            _window: Duration,
        ) -> Result<Vec<MetricPoint>, SourceError> {
            let value = match metric {
                MetricKind::Cpu => self.cpu,
                MetricKind::Up => 1.0,
                _ => 10.0,
            };
            Ok(vec![MetricPoint {
                timestamp: Utc::now(),
                value,
            }])
        }

        async fn scrape_fleet(&self) -> Result<MetricSnapshot, SourceError> {
            Ok(MetricSnapshot::new(vec![MetricSample {
                service: "vmagent".to_string(),
                cluster: "k8s-paas-scw-1".to_string(),
                kind: MetricKind::Cpu,
                value: self.cpu,
                timestamp: Utc::now(),
            }]))
        }
    }

    struct QuietLogs;

    #[async_trait::async_trait]
    impl LogSource for QuietLogs {
        async fn query(
            &self,
            _service: &str,
            _window: Duration,
            _limit: usize,
        ) -> Result<Vec<LogLine>, SourceError> {
            Ok(vec![])
        }
    }

    struct OkNotifier;

    #[async_trait::async_trait]
    impl Notifier for OkNotifier {
        async fn send(&self, _channel: &str, _message: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn pipeline(cpu: f64) -> Pipeline {
        let metrics = Arc::new(FleetMetrics { cpu });
        let investigator = Arc::new(Investigator::new(
            metrics.clone(),
            Arc::new(QuietLogs),
            None,
            None,
            Duration::from_secs(5),
        ));
        let playbooks = Arc::new(PlaybookEngine::new(
            builtin::defaults(),
            investigator.clone(),
            Arc::new(OkNotifier),
            None,
            "#test",
        ));
        Pipeline {
            metrics,
            detector: Arc::new(AnomalyDetector::new(None, Duration::from_secs(5))),
            playbooks,
            investigator,
            cell: Arc::new(AnalysisCell::default()),
            pool: None,
            auto_trigger_severity: Severity::High,
        }
    }

    #[tokio::test]
    async fn test_healthy_cycle_publishes_without_dispatch() {
        let p = pipeline(30.0);
        p.run_cycle().await;
        let latest = p.cell.latest().unwrap();
        assert!(!latest.anomalies_detected);
        assert!(p.playbooks.list_runs(10).is_empty());
    }

    #[tokio::test]
    async fn test_critical_anomaly_is_promoted_and_dispatched() {
        let p = pipeline(94.7);
        p.run_cycle().await;
        let latest = p.cell.latest().unwrap();
        assert_eq!(latest.anomalies.len(), 1);
        // the promoted event matched at least the detector playbook
        let runs = p.playbooks.list_runs(10);
        assert!(!runs.is_empty());
        assert!(runs.iter().any(|r| r.investigation_id.is_some()));
    }

    #[tokio::test]
    async fn test_medium_anomaly_stays_below_trigger() {
        let p = pipeline(75.0); // medium tier only
        p.run_cycle().await;
        assert!(p.cell.latest().unwrap().anomalies_detected);
        assert!(p.playbooks.list_runs(10).is_empty());
    }

    #[test]
    fn test_anomaly_event_shape() {
        let snapshot = MetricSnapshot::new(vec![MetricSample {
            service: "vmagent".to_string(),
            cluster: "k8s-paas-scw-1".to_string(),
            kind: MetricKind::Cpu,
            value: 94.7,
            timestamp: Utc::now(),
        }]);
        let result = crate::detect::rules::analyze(&snapshot);
        let event = anomaly_event(&result.anomalies[0]);
        assert_eq!(event.alertname(), "AnomalyDetected");
        assert_eq!(event.source.as_deref(), Some("detector"));
        assert_eq!(event.severity(), Some(Severity::Critical));
        assert_eq!(event.value_f64(), Some(94.7));
    }
}
