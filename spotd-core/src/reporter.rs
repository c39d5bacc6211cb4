//! Event Reporter
//!
//! Emits one audit event per relocated pod. Submission is best effort:
//! failures are logged and counted but never retried and never change the
//! outcome of the eviction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::SharedCluster;
use crate::metrics::MetricsRegistry;
use crate::pod::PodInfo;

/// Controller identity recorded on every event
pub const REPORTING_CONTROLLER: &str = "spotd/spot-termination-handler";
/// Event action
pub const EVENT_ACTION: &str = "delete pod";
/// Event reason
pub const EVENT_REASON: &str = "SpotTermination";

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Reference to the object an event is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub api_version: String,
    pub resource_version: Option<String>,
}

/// Audit event describing one reclamation-triggered eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Name prefix; the server appends a random suffix
    pub generate_name: String,
    pub namespace: String,
    pub regarding: ObjectRef,
    pub event_time: DateTime<Utc>,
    pub reporting_controller: String,
    pub reporting_instance: String,
    pub action: String,
    pub reason: String,
    pub note: String,
    pub event_type: EventType,
}

impl AuditEvent {
    /// Build the event for an evicted pod
    pub fn for_evicted_pod(
        pod: &PodInfo,
        reporting_instance: &str,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            generate_name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            regarding: ObjectRef {
                kind: pod.kind.clone(),
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
                uid: pod.uid.clone(),
                api_version: pod.api_version.clone(),
                resource_version: pod.resource_version.clone(),
            },
            event_time,
            reporting_controller: REPORTING_CONTROLLER.to_string(),
            reporting_instance: reporting_instance.to_string(),
            action: EVENT_ACTION.to_string(),
            reason: EVENT_REASON.to_string(),
            note: format!(
                "pod {} in namespace {} evicted due to spot node termination",
                pod.name, pod.namespace
            ),
            event_type: EventType::Normal,
        }
    }
}

/// Submits audit events through the cluster client
#[derive(Clone)]
pub struct EventReporter {
    cluster: SharedCluster,
    reporting_instance: String,
    metrics: Arc<MetricsRegistry>,
}

impl EventReporter {
    pub fn new(
        cluster: SharedCluster,
        reporting_instance: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            cluster,
            reporting_instance: reporting_instance.into(),
            metrics,
        }
    }

    /// Record that a pod was evicted. Never fails.
    pub async fn record(&self, pod: &PodInfo) {
        let event = AuditEvent::for_evicted_pod(pod, &self.reporting_instance, Utc::now());

        match self.cluster.create_event(&event).await {
            Ok(()) => {
                self.metrics.inc_audit_event("created");
                info!(pod = %pod, "{} in namespace {}, evicted", pod.name, pod.namespace);
            }
            Err(e) => {
                self.metrics.inc_audit_event("failed");
                warn!(pod = %pod, error = %e, "Failed to generate event for pod");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Call, ClusterError, MockCluster};
    use chrono::TimeZone;

    #[test]
    fn test_event_shape() {
        let mut pod = PodInfo::new("shop", "cart-7d9f").with_uid("uid-123");
        pod.resource_version = Some("4242".to_string());
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let event = AuditEvent::for_evicted_pod(&pod, "spotd-abc", now);

        assert_eq!(event.generate_name, "cart-7d9f");
        assert_eq!(event.namespace, "shop");
        assert_eq!(event.regarding.kind, "Pod");
        assert_eq!(event.regarding.api_version, "v1");
        assert_eq!(event.regarding.uid, "uid-123");
        assert_eq!(event.regarding.resource_version.as_deref(), Some("4242"));
        assert_eq!(event.event_time, now);
        assert_eq!(event.reporting_controller, REPORTING_CONTROLLER);
        assert_eq!(event.reporting_instance, "spotd-abc");
        assert_eq!(event.action, "delete pod");
        assert_eq!(event.reason, "SpotTermination");
        assert!(event.note.contains("cart-7d9f"));
        assert!(event.note.contains("shop"));
        assert_eq!(event.event_type, EventType::Normal);
    }

    #[tokio::test]
    async fn test_record_submits_one_event() {
        let cluster = Arc::new(MockCluster::new());
        let reporter = EventReporter::new(cluster.clone(), "spotd-abc", Arc::new(MetricsRegistry::new()));

        reporter.record(&PodInfo::new("default", "p1")).await;

        let events = cluster.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].regarding.name, "p1");
    }

    #[tokio::test]
    async fn test_record_swallows_failures() {
        let cluster = Arc::new(MockCluster::new().fail_events(ClusterError::Forbidden {
            message: "events is forbidden".to_string(),
        }));
        let reporter = EventReporter::new(cluster.clone(), "spotd-abc", Arc::new(MetricsRegistry::new()));

        reporter.record(&PodInfo::new("default", "p1")).await;

        // Exactly one attempt, no retry.
        assert_eq!(
            cluster.count_calls(|c| matches!(c, Call::CreateEvent(_))),
            1
        );
        assert!(cluster.events().is_empty());
    }
}
