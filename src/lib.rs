//! FleetMedic -- appliance-grade fleet triage.
//!
//! This crate provides the core library for fleet anomaly detection,
//! root-cause investigation, playbook automation, and the audit ledger.

pub mod api;
pub mod config;
pub mod detect;
pub mod investigate;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod playbook;
pub mod reasoning;
pub mod sources;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::FleetConfig;
use crate::detect::engine::AnomalyDetector;
use crate::investigate::engine::Investigator;
use crate::model::Event;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::pipeline::{AnalysisCell, Pipeline};
use crate::playbook::engine::PlaybookEngine;
use crate::playbook::remediate::HttpRemediationHook;
use crate::playbook::{builtin, RemediationHook};
use crate::sources::kube::KubeSource;
use crate::sources::loki::LokiSource;
use crate::sources::victoria::VictoriaMetricsSource;
use crate::storage::Pool;

/// Wire the configured collaborators and engines into one pipeline.
pub fn build_pipeline(config: &FleetConfig, pool: Option<Pool>) -> Pipeline {
    let source_timeout = Duration::from_secs(config.sources.timeout_secs);
    let reasoning_timeout = Duration::from_secs(config.reasoning.timeout_secs);

    let metrics = Arc::new(VictoriaMetricsSource::new(
        &config.sources.metrics_url,
        source_timeout,
    ));
    let logs = Arc::new(LokiSource::new(&config.sources.logs_url, source_timeout));
    let orchestration: Option<Arc<dyn sources::OrchestrationSource>> =
        if config.sources.orchestration_url.is_empty() {
            None
        } else {
            Some(Arc::new(KubeSource::new(
                &config.sources.orchestration_url,
                &config.sources.namespace,
                source_timeout,
            )))
        };

    let reasoning = reasoning::from_config(&config.reasoning);

    let detector = Arc::new(AnomalyDetector::new(reasoning.clone(), reasoning_timeout));
    let investigator = Arc::new(Investigator::new(
        metrics.clone(),
        logs,
        orchestration,
        reasoning,
        reasoning_timeout,
    ));

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, source_timeout)),
        None => Arc::new(LogNotifier),
    };
    let remediation: Option<Arc<dyn RemediationHook>> = config
        .remediate
        .hook_url
        .as_ref()
        .map(|url| Arc::new(HttpRemediationHook::new(url, source_timeout)) as _);

    let playbooks = Arc::new(PlaybookEngine::new(
        builtin::defaults(),
        investigator.clone(),
        notifier,
        remediation,
        &config.notify.channel,
    ));

    Pipeline {
        metrics,
        detector,
        playbooks,
        investigator,
        cell: Arc::new(AnalysisCell::default()),
        pool,
        auto_trigger_severity: config.pipeline.auto_trigger_severity,
    }
}

/// Start the FleetMedic daemon: ledger, analysis loop, and API server.
pub async fn serve(bind: &str, config: FleetConfig) -> Result<()> {
    tracing::info!(db_path = %config.pipeline.db_path, "Initializing ledger");
    let pool = storage::open_pool(&config.pipeline.db_path)?;

    let pipeline = Arc::new(build_pipeline(&config, Some(pool)));

    tokio::spawn(pipeline::run_analysis_loop(
        pipeline.clone(),
        config.pipeline.analysis_cron.clone(),
    ));

    let addr: std::net::SocketAddr = bind.parse()?;
    let app = api::router(api::state::AppState { pipeline });

    tracing::info!(%addr, "FleetMedic listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build an inbound event from ad-hoc CLI arguments.
pub fn event_from_args(
    service: &str,
    cluster: Option<&str>,
    alertname: Option<&str>,
    severity: Option<&str>,
    metric: Option<&str>,
    value: Option<f64>,
) -> Event {
    Event {
        alertname: alertname.map(str::to_string),
        source: Some("cli".to_string()),
        service: Some(service.to_string()),
        cluster: cluster.map(str::to_string),
        severity: severity.map(str::to_string),
        metric: metric.map(str::to_string),
        value: value.map(|v| serde_json::json!(v)),
        description: None,
        extra: Default::default(),
    }
}
