//! VictoriaMetrics / Prometheus-compatible metrics source.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use super::{MetricPoint, MetricSource, SourceError};
use crate::model::{MetricKind, MetricSample, MetricSnapshot};

/// The fleet-wide expressions scraped each analysis cycle, one per metric
/// family the rule table knows about.
const FLEET_QUERIES: &[(MetricKind, &str)] = &[
    (MetricKind::Cpu, "rate(process_cpu_seconds_total[5m]) * 100"),
    (
        MetricKind::Memory,
        "process_resident_memory_bytes / 1024 / 1024",
    ),
    (MetricKind::Latency, "scrape_duration_seconds * 1000"),
    (MetricKind::Up, "up"),
];

pub struct VictoriaMetricsSource {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl VictoriaMetricsSource {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// PromQL for one service-scoped metric family.
    fn promql(metric: &MetricKind, service: &str, cluster: &str) -> String {
        let selector = if cluster.is_empty() {
            format!("job=\"{service}\"")
        } else {
            format!("job=\"{service}\",cluster=\"{cluster}\"")
        };
        match metric {
            MetricKind::Cpu => {
                format!("rate(process_cpu_seconds_total{{{selector}}}[5m]) * 100")
            }
            MetricKind::Memory => {
                format!("process_resident_memory_bytes{{{selector}}} / 1024 / 1024")
            }
            MetricKind::Latency => format!("scrape_duration_seconds{{{selector}}} * 1000"),
            MetricKind::Up => format!("up{{{selector}}}"),
            MetricKind::ErrorRate => format!(
                "100 * sum(rate(http_requests_total{{{selector},code=~\"5..\"}}[5m])) \
                 / sum(rate(http_requests_total{{{selector}}}[5m]))"
            ),
            MetricKind::Other(name) => format!("{name}{{{selector}}}"),
        }
    }

    async fn query_range_raw(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, SourceError> {
        let resp = self
            .client
            .get(format!("{}/api/v1/query_range", self.base_url))
            .query(&[
                ("query", query),
                ("start", &start.timestamp().to_string()),
                ("end", &end.timestamp().to_string()),
                ("step", "30s"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SourceError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
            });
        }
        resp.json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))
    }

    async fn query_instant_raw(&self, query: &str) -> Result<Value, SourceError> {
        let resp = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", query)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SourceError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
            });
        }
        resp.json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

/// Walk `data.result[].value` pairs of an instant-query response into
/// labeled samples.
fn instant_samples(body: &Value, kind: &MetricKind) -> Vec<MetricSample> {
    let mut out = Vec::new();
    let results = body
        .pointer("/data/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for item in results {
        let labels = item.get("metric").cloned().unwrap_or(Value::Null);
        let Some(pair) = item.get("value").and_then(Value::as_array) else {
            continue;
        };
        let (Some(ts), Some(val)) = (
            pair.first().and_then(Value::as_f64),
            pair.get(1).and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok()),
        ) else {
            continue;
        };
        out.push(MetricSample {
            service: labels
                .get("job")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            cluster: labels
                .get("cluster")
                .and_then(Value::as_str)
                .unwrap_or("local")
                .to_string(),
            kind: kind.clone(),
            value: val,
            timestamp: Utc
                .timestamp_opt(ts as i64, 0)
                .single()
                .unwrap_or_else(Utc::now),
        });
    }
    out
}

#[async_trait::async_trait]
impl MetricSource for VictoriaMetricsSource {
    async fn query(
        &self,
        service: &str,
        metric: &MetricKind,
        cluster: &str,
        window: Duration,
    ) -> Result<Vec<MetricPoint>, SourceError> {
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::minutes(5));
        let query = Self::promql(metric, service, cluster);
        let body = self.query_range_raw(&query, start, end).await?;

        let mut points = Vec::new();
        let results = body
            .pointer("/data/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for series in results {
            let values = series
                .get("values")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for pair in values {
                let (Some(ts), Some(val)) = (
                    pair.get(0).and_then(Value::as_f64),
                    pair.get(1)
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<f64>().ok()),
                ) else {
                    continue;
                };
                points.push(MetricPoint {
                    timestamp: Utc
                        .timestamp_opt(ts as i64, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                    value: val,
                });
            }
        }
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn scrape_fleet(&self) -> Result<MetricSnapshot, SourceError> {
        let futures = FLEET_QUERIES
            .iter()
            .map(|(kind, query)| async move {
                (kind, self.query_instant_raw(query).await)
            });
        let responses = join_all(futures).await;

        let mut samples = Vec::new();
        let mut last_err = None;
        for (kind, resp) in responses {
            match resp {
                Ok(body) => samples.extend(instant_samples(&body, kind)),
                Err(e) => {
                    warn!(metric = %kind, error = %e, "fleet scrape query failed");
                    last_err = Some(e);
                }
            }
        }

        // Only fail the cycle when every family errored; partial scrapes
        // still make a usable snapshot.
        if samples.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        Ok(MetricSnapshot::new(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promql_includes_cluster_selector() {
        let q = VictoriaMetricsSource::promql(&MetricKind::Cpu, "vmagent", "k8s-paas-scw-1");
        assert!(q.contains("job=\"vmagent\""));
        assert!(q.contains("cluster=\"k8s-paas-scw-1\""));
        let q = VictoriaMetricsSource::promql(&MetricKind::Up, "vmagent", "");
        assert_eq!(q, "up{job=\"vmagent\"}");
    }

    #[test]
    fn test_instant_samples_walks_prometheus_shape() {
        let body = serde_json::json!({
            "status": "success",
            "data": {
                "result": [
                    {
                        "metric": {"job": "vmagent", "cluster": "k8s-paas-scw-1"},
                        "value": [1700000000.0, "94.7"]
                    },
                    {
                        "metric": {"job": "scheduler"},
                        "value": [1700000000.0, "not-a-number"]
                    }
                ]
            }
        });
        let samples = instant_samples(&body, &MetricKind::Cpu);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].service, "vmagent");
        assert_eq!(samples[0].cluster, "k8s-paas-scw-1");
        assert!((samples[0].value - 94.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_instant_samples_empty_result() {
        let body = serde_json::json!({"status": "success", "data": {"result": []}});
        assert!(instant_samples(&body, &MetricKind::Up).is_empty());
    }
}
