//! Loki log source.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;

use super::{LogLevel, LogLine, LogSource, SourceError};

pub struct LokiSource {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl LokiSource {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

/// Flatten Loki's stream/values response into classified log lines,
/// newest first.
fn lines_from_response(body: &Value) -> Vec<LogLine> {
    let mut lines = Vec::new();
    let streams = body
        .pointer("/data/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for stream in streams {
        let labels: BTreeMap<String, String> = stream
            .get("stream")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let values = stream
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for pair in values {
            let (Some(ts_ns), Some(line)) = (
                pair.get(0)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<i64>().ok()),
                pair.get(1).and_then(Value::as_str),
            ) else {
                continue;
            };
            let level = LogLevel::classify(labels.get("level").map(String::as_str), line);
            lines.push(LogLine {
                timestamp: Utc
                    .timestamp_nanos(ts_ns)
                    .with_timezone(&Utc),
                line: line.to_string(),
                level,
                labels: labels.clone(),
            });
        }
    }

    lines.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    lines
}

#[async_trait::async_trait]
impl LogSource for LokiSource {
    async fn query(
        &self,
        service: &str,
        window: Duration,
        limit: usize,
    ) -> Result<Vec<LogLine>, SourceError> {
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::minutes(5));
        let query = format!("{{job=\"{service}\"}}");

        let resp = self
            .client
            .get(format!("{}/loki/api/v1/query_range", self.base_url))
            .query(&[
                ("query", query.as_str()),
                ("start", &start.timestamp_nanos_opt().unwrap_or(0).to_string()),
                ("end", &end.timestamp_nanos_opt().unwrap_or(0).to_string()),
                ("limit", &limit.to_string()),
                ("direction", "backward"),
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

        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        let mut lines = lines_from_response(&body);
        lines.truncate(limit);
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_from_loki_shape() {
        let body = serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "streams",
                "result": [
                    {
                        "stream": {"job": "vmagent", "level": "error"},
                        "values": [
                            ["1700000060000000000", "connection timeout to downstream"],
                            ["1700000000000000000", "retrying scrape"]
                        ]
                    },
                    {
                        "stream": {"job": "vmagent"},
                        "values": [["1700000030000000000", "WARN memory usage at 85%"]]
                    }
                ]
            }
        });
        let lines = lines_from_response(&body);
        assert_eq!(lines.len(), 3);
        // newest first
        assert!(lines[0].timestamp > lines[1].timestamp);
        // stream label wins over content scan
        assert_eq!(lines[0].level, LogLevel::Error);
        // no label -> content classification
        assert_eq!(
            lines.iter().find(|l| l.line.starts_with("WARN")).unwrap().level,
            LogLevel::Warn
        );
    }

    #[test]
    fn test_empty_response_yields_no_lines() {
        let body = serde_json::json!({"status": "success", "data": {"result": []}});
        assert!(lines_from_response(&body).is_empty());
    }
}
