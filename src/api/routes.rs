//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{routing::get, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::model::Event;

use super::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", get(analyze))
        .route("/anomalies", get(anomalies))
        .route("/insights", get(insights))
        .route("/trends", get(trends))
        .route("/investigate", post(investigate))
        .route("/investigations", get(list_investigations))
        .route("/investigations/{id}", get(get_investigation))
        .route("/events", post(receive_event))
        .route("/playbooks", get(list_playbooks))
        .route("/runs", get(list_runs))
        .route("/webhook/alerts", post(alertmanager_webhook))
}

fn envelope(data: Value, meta: Value) -> Json<Value> {
    Json(json!({ "data": data, "meta": meta }))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct HoursQuery {
    hours: Option<u64>,
}

async fn health() -> Json<Value> {
    envelope(json!({ "status": "ok" }), meta())
}

/// Run a fresh fleet analysis and publish it.
async fn analyze(State(state): State<AppState>) -> Json<Value> {
    let pipeline = &state.pipeline;
    match pipeline.metrics.scrape_fleet().await {
        Ok(snapshot) => {
            let result = pipeline.detector.analyze(&snapshot).await;
            pipeline.cell.publish(result.clone());
            envelope(json!(result), meta())
        }
        Err(e) => envelope(
            json!(null),
            json!({ "error": format!("fleet scrape failed: {e}") }),
        ),
    }
}

/// Anomalies from the most recent published analysis.
async fn anomalies(State(state): State<AppState>) -> Json<Value> {
    match state.pipeline.cell.latest() {
        Some(analysis) => {
            let count = analysis.anomalies.len();
            envelope(
                json!(analysis.anomalies),
                json!({ "count": count, "engine": analysis.engine }),
            )
        }
        None => envelope(json!([]), json!({ "message": "no analysis yet" })),
    }
}

async fn insights(State(state): State<AppState>) -> Json<Value> {
    match state.pipeline.cell.latest() {
        Some(analysis) => envelope(
            json!({
                "insights": analysis.insights,
                "health_score": analysis.overall_health_score,
                "anomaly_count": analysis.anomalies.len(),
            }),
            meta(),
        ),
        None => envelope(json!(null), json!({ "message": "no analysis yet" })),
    }
}

async fn trends(State(state): State<AppState>, Query(q): Query<HoursQuery>) -> Json<Value> {
    let report = state.pipeline.detector.trends(q.hours.unwrap_or(24));
    envelope(json!(report), meta())
}

/// Trigger an investigation. The body is the alert mapping, either bare
/// or wrapped as `{"alert": {...}}`.
async fn investigate(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    let alert_value = body.get("alert").cloned().unwrap_or(body);
    let alert: Event = match serde_json::from_value(alert_value) {
        Ok(a) => a,
        Err(e) => {
            return envelope(json!(null), json!({ "error": format!("bad alert payload: {e}") }))
        }
    };

    let inv = state.pipeline.investigator.investigate(alert).await;
    if let Some(pool) = &state.pipeline.pool {
        crate::storage::save_investigation(pool, &inv);
    }
    envelope(json!(inv), meta())
}

async fn list_investigations(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Value> {
    let investigator = &state.pipeline.investigator;
    let list = investigator.list(q.limit.unwrap_or(30));
    envelope(json!(list), json!({ "total": investigator.count() }))
}

async fn get_investigation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.pipeline.investigator.get(&id) {
        Some(inv) => Ok(envelope(json!(inv), meta())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// Receive an inbound event and dispatch it to matching playbooks.
async fn receive_event(State(state): State<AppState>, Json(event): Json<Event>) -> Json<Value> {
    let runs = state.pipeline.dispatch(event).await;
    let triggered = runs.len();
    envelope(json!(runs), json!({ "playbooks_triggered": triggered }))
}

async fn list_playbooks(State(state): State<AppState>) -> Json<Value> {
    let playbooks = state.pipeline.playbooks.list_playbooks();
    let total = playbooks.len();
    envelope(json!(playbooks), json!({ "total": total }))
}

async fn list_runs(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Json<Value> {
    let runs = state.pipeline.playbooks.list_runs(q.limit.unwrap_or(30));
    let total = runs.len();
    envelope(json!(runs), json!({ "total": total }))
}

/// Alertmanager-style webhook: each alert in the payload becomes one
/// inbound event.
async fn alertmanager_webhook(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let alerts = body
        .get("alerts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut total_runs = 0;
    let received = alerts.len();
    for alert in alerts {
        let labels = alert.get("labels").cloned().unwrap_or(json!({}));
        let event = Event {
            alertname: labels
                .get("alertname")
                .and_then(Value::as_str)
                .map(str::to_string),
            source: Some("alertmanager".to_string()),
            service: labels.get("job").and_then(Value::as_str).map(str::to_string),
            cluster: labels
                .get("cluster")
                .and_then(Value::as_str)
                .map(str::to_string),
            severity: labels
                .get("severity")
                .and_then(Value::as_str)
                .map(str::to_string),
            metric: None,
            value: None,
            description: alert
                .pointer("/annotations/description")
                .and_then(Value::as_str)
                .map(str::to_string),
            extra: Default::default(),
        };
        total_runs += state.pipeline.dispatch(event).await.len();
    }

    envelope(
        json!({ "alerts_received": received, "runs": total_runs }),
        meta(),
    )
}
