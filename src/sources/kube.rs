//! Orchestration-state provider backed by the Kubernetes API server.
//!
//! Only two read paths are needed: resolve the workload's pod by the
//! `app=<service>` label, and pull its recent warning events. Payloads are
//! walked as raw JSON; this client deliberately does not model the full
//! Kubernetes object schema.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use super::{ContainerStatus, OrchestrationSource, SourceError, WorkloadEvent, WorkloadStatus};

pub struct KubeSource {
    client: Client,
    base_url: String,
    namespace: String,
    timeout: Duration,
}

impl KubeSource {
    pub fn new(base_url: &str, namespace: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            timeout,
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, SourceError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
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

/// First pod of a list response, reduced to the fields investigations use.
fn workload_from_pod(pod: &Value, namespace: &str) -> Option<WorkloadStatus> {
    let name = pod.pointer("/metadata/name")?.as_str()?.to_string();
    let status = pod
        .pointer("/status/phase")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();

    let containers = pod
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|c| ContainerStatus {
                    name: c
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    ready: c.get("ready").and_then(Value::as_bool).unwrap_or(false),
                    restart_count: c
                        .get("restartCount")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                    last_state: c
                        .pointer("/lastState/terminated/reason")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(WorkloadStatus {
        name,
        namespace: namespace.to_string(),
        status,
        containers,
        events: Vec::new(),
    })
}

/// Warning events for the named pod.
fn events_from_list(body: &Value) -> Vec<WorkloadEvent> {
    body.pointer("/items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|e| {
                    e.get("type").and_then(Value::as_str) == Some("Warning")
                })
                .map(|e| WorkloadEvent {
                    reason: e
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown")
                        .to_string(),
                    message: e
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    count: e.get("count").and_then(Value::as_u64).unwrap_or(1) as u32,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl OrchestrationSource for KubeSource {
    async fn describe(
        &self,
        service: &str,
        _cluster: &str,
    ) -> Result<Option<WorkloadStatus>, SourceError> {
        let selector = format!("app={service}");
        let pods = self
            .get_json(
                &format!("/api/v1/namespaces/{}/pods", self.namespace),
                &[("labelSelector", selector.as_str()), ("limit", "1")],
            )
            .await?;

        let Some(pod) = pods
            .pointer("/items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
        else {
            return Ok(None);
        };

        let Some(mut workload) = workload_from_pod(pod, &self.namespace) else {
            return Ok(None);
        };

        let field_selector = format!("involvedObject.name={}", workload.name);
        match self
            .get_json(
                &format!("/api/v1/namespaces/{}/events", self.namespace),
                &[("fieldSelector", field_selector.as_str())],
            )
            .await
        {
            Ok(body) => workload.events = events_from_list(&body),
            // Events are supplementary; a failed event query does not
            // invalidate the pod description.
            Err(e) => tracing::warn!(pod = %workload.name, error = %e, "event query failed"),
        }

        Ok(Some(workload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_from_pod_extracts_restart_state() {
        let pod = serde_json::json!({
            "metadata": {"name": "vmagent-7d9f8b6c4-xkj2p"},
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "vmagent",
                    "ready": true,
                    "restartCount": 2,
                    "lastState": {"terminated": {"reason": "OOMKilled", "exitCode": 137}}
                }]
            }
        });
        let w = workload_from_pod(&pod, "default").unwrap();
        assert_eq!(w.name, "vmagent-7d9f8b6c4-xkj2p");
        assert_eq!(w.restart_count(), 2);
        assert_eq!(w.last_state(), Some("OOMKilled"));
    }

    #[test]
    fn test_events_filter_warnings_only() {
        let body = serde_json::json!({
            "items": [
                {"type": "Warning", "reason": "OOMKilling", "message": "memory limit exceeded", "count": 3},
                {"type": "Normal", "reason": "Scheduled", "message": "assigned", "count": 1}
            ]
        });
        let events = events_from_list(&body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "OOMKilling");
        assert_eq!(events[0].count, 3);
    }
}
