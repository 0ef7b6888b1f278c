//! Built-in playbook catalog, registered at startup.

use crate::model::Severity;

use super::{Action, ActionKind, Playbook, Trigger, TriggerRule};

pub fn defaults() -> Vec<Playbook> {
    vec![
        Playbook::new(
            "on_service_down",
            "When a service goes down: investigate, then route the enriched alert.",
            vec![Trigger {
                name: "on_alert:ServiceDown".to_string(),
                rules: vec![
                    TriggerRule::AlertNameIn(vec![
                        "ServiceDown".to_string(),
                        "InstanceDown".to_string(),
                    ]),
                    TriggerRule::FieldEquals {
                        field: "status".to_string(),
                        value: "down".to_string(),
                    },
                ],
            }],
            vec![
                Action::new(
                    "root_cause_investigation",
                    "Run a root-cause investigation",
                    ActionKind::Investigate,
                ),
                Action::new(
                    "send_enriched_alert",
                    "Enrich and route the alert to the on-call channel",
                    ActionKind::Notify,
                ),
            ],
        )
        .tags(&["service-health"]),
        Playbook::new(
            "on_high_cpu",
            "Investigate high-CPU events and notify with a scaling recommendation.",
            vec![Trigger {
                name: "on_alert:HighCPUUsage".to_string(),
                rules: vec![
                    TriggerRule::AlertNameIn(vec![
                        "HighCPUUsage".to_string(),
                        "CPUThrottling".to_string(),
                    ]),
                    TriggerRule::MetricContains {
                        pattern: "cpu".to_string(),
                        min_value: Some(80.0),
                    },
                ],
            }],
            vec![
                Action::new(
                    "root_cause_investigation",
                    "Run a root-cause investigation",
                    ActionKind::Investigate,
                ),
                Action::new(
                    "scaling_notification",
                    "Notify with the investigation's scaling recommendations",
                    ActionKind::Notify,
                ),
            ],
        )
        .tags(&["cpu", "scaling"]),
        Playbook::new(
            "on_oom_kill",
            "Handle OOMKill events: investigate memory growth, notify, and scale \
             the memory limit when auto-remediation is on.",
            vec![Trigger {
                name: "on_workload_oom_killed".to_string(),
                rules: vec![
                    TriggerRule::AlertNameContains("oom".to_string()),
                    TriggerRule::FieldContains {
                        field: "reason".to_string(),
                        pattern: "oom".to_string(),
                    },
                    TriggerRule::MetricContains {
                        pattern: "memory".to_string(),
                        min_value: None,
                    },
                    TriggerRule::FieldEquals {
                        field: "last_state".to_string(),
                        value: "OOMKilled".to_string(),
                    },
                ],
            }],
            vec![
                Action::new(
                    "root_cause_investigation",
                    "Run a root-cause investigation",
                    ActionKind::Investigate,
                ),
                Action::new(
                    "notify_on_call",
                    "Send the enriched report to the on-call channel",
                    ActionKind::Notify,
                ),
                Action::new(
                    "raise_memory_limit",
                    "Ask the remediation hook to raise the memory limit",
                    ActionKind::Remediate,
                ),
            ],
        )
        .auto_remediate()
        .tags(&["oom", "memory"]),
        Playbook::new(
            "on_detector_anomaly",
            "When the anomaly detector promotes a fleet anomaly, investigate and \
             notify with cross-service context.",
            vec![Trigger {
                name: "on_detector_anomaly".to_string(),
                rules: vec![
                    TriggerRule::SourceIs("detector".to_string()),
                    TriggerRule::AlertNameIn(vec!["AnomalyDetected".to_string()]),
                ],
            }],
            vec![
                Action::new(
                    "root_cause_investigation",
                    "Run a root-cause investigation",
                    ActionKind::Investigate,
                ),
                Action::new(
                    "notify_on_call",
                    "Send the enriched report to the on-call channel",
                    ActionKind::Notify,
                ),
            ],
        )
        .tags(&["detector", "fleet"]),
        Playbook::new(
            "on_critical_alert",
            "For any critical-severity alert: immediate investigation and page.",
            vec![Trigger {
                name: "on_alert:severity=critical".to_string(),
                rules: vec![TriggerRule::SeverityIs(Severity::Critical)],
            }],
            vec![
                Action::new(
                    "root_cause_investigation",
                    "Run a root-cause investigation",
                    ActionKind::Investigate,
                ),
                Action::new(
                    "create_incident",
                    "Create an incident and page on-call",
                    ActionKind::Notify,
                ),
            ],
        )
        .tags(&["critical", "incident"]),
        Playbook::new(
            "on_scrape_failure",
            "When the metrics agent reports scrape failures, investigate target \
             connectivity and service health.",
            vec![Trigger {
                name: "on_alert:HighScrapeFailureRate".to_string(),
                rules: vec![TriggerRule::AlertNameIn(vec![
                    "HighScrapeFailureRate".to_string(),
                    "ScrapeFailed".to_string(),
                ])],
            }],
            vec![
                Action::new(
                    "root_cause_investigation",
                    "Run a root-cause investigation",
                    ActionKind::Investigate,
                ),
                Action::new(
                    "notify_on_call",
                    "Send the enriched report to the on-call channel",
                    ActionKind::Notify,
                ),
            ],
        )
        .tags(&["metrics", "networking"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;

    fn event(json: serde_json::Value) -> Event {
        serde_json::from_value(json).unwrap()
    }

    fn matching_names(ev: &Event) -> Vec<String> {
        defaults()
            .iter()
            .filter(|pb| pb.matches(ev))
            .map(|pb| pb.name.clone())
            .collect()
    }

    #[test]
    fn test_catalog_has_six_playbooks() {
        assert_eq!(defaults().len(), 6);
    }

    #[test]
    fn test_critical_cpu_event_matches_multiple_playbooks() {
        let names = matching_names(&event(serde_json::json!({
            "alertname": "HighCPUUsage",
            "service": "vmagent",
            "severity": "critical",
            "metric": "cpu",
            "value": 94.7
        })));
        assert!(names.contains(&"on_high_cpu".to_string()));
        assert!(names.contains(&"on_critical_alert".to_string()));
        assert!(!names.contains(&"on_service_down".to_string()));
    }

    #[test]
    fn test_oom_event_matches_by_last_state() {
        let names = matching_names(&event(serde_json::json!({
            "alertname": "PodCrashLooping",
            "service": "training-controller",
            "last_state": "OOMKilled"
        })));
        assert_eq!(names, vec!["on_oom_kill".to_string()]);
    }

    #[test]
    fn test_detector_promotion_matches_anomaly_playbook() {
        let names = matching_names(&event(serde_json::json!({
            "alertname": "AnomalyDetected",
            "source": "detector",
            "service": "vmagent",
            "severity": "high"
        })));
        assert!(names.contains(&"on_detector_anomaly".to_string()));
    }

    #[test]
    fn test_unmatched_event_matches_nothing() {
        let names = matching_names(&event(serde_json::json!({
            "alertname": "SomethingElse",
            "severity": "warning"
        })));
        assert!(names.is_empty());
    }

    #[test]
    fn test_only_oom_playbook_auto_remediates() {
        for pb in defaults() {
            assert_eq!(pb.auto_remediate, pb.name == "on_oom_kill");
        }
    }
}
