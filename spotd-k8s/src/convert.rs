//! Conversions between Kubernetes objects and spotd-core types

use k8s_openapi::api::core::v1::{Node, ObjectReference, Pod};
use k8s_openapi::api::events::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use k8s_openapi::Resource;
use spotd_core::{AuditEvent, ControllerKind, NodeInfo, PodInfo, PodPhase};

/// Annotation the kubelet sets on mirror pods of static manifests
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

pub fn node_info(node: &Node) -> NodeInfo {
    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
    }
}

pub fn pod_info(pod: &Pod) -> PodInfo {
    let meta = &pod.metadata;

    PodInfo {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        resource_version: meta.resource_version.clone(),
        api_version: Pod::API_VERSION.to_string(),
        kind: Pod::KIND.to_string(),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        controller: controller_kind(pod),
        uses_local_storage: uses_empty_dir(pod),
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::parse)
            .unwrap_or_default(),
    }
}

/// Mirror annotation wins over owner references.
fn controller_kind(pod: &Pod) -> ControllerKind {
    let is_mirror = pod
        .metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key(MIRROR_POD_ANNOTATION))
        .unwrap_or(false);
    if is_mirror {
        return ControllerKind::Mirror;
    }

    let controller = pod
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true));

    match controller {
        Some(owner) if owner.kind == "DaemonSet" => ControllerKind::DaemonSet,
        Some(owner) => ControllerKind::Managed(owner.kind.clone()),
        None => ControllerKind::None,
    }
}

fn uses_empty_dir(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| volumes.iter().any(|v| v.empty_dir.is_some()))
        .unwrap_or(false)
}

/// Build an `events.k8s.io/v1` Event from an audit event
pub fn event(audit: &AuditEvent) -> Event {
    Event {
        metadata: ObjectMeta {
            generate_name: Some(audit.generate_name.clone()),
            namespace: Some(audit.namespace.clone()),
            ..ObjectMeta::default()
        },
        event_time: Some(MicroTime(audit.event_time)),
        action: Some(audit.action.clone()),
        reason: Some(audit.reason.clone()),
        note: Some(audit.note.clone()),
        type_: Some(audit.event_type.as_str().to_string()),
        reporting_controller: Some(audit.reporting_controller.clone()),
        reporting_instance: Some(audit.reporting_instance.clone()),
        regarding: Some(ObjectReference {
            api_version: Some(audit.regarding.api_version.clone()),
            kind: Some(audit.regarding.kind.clone()),
            name: Some(audit.regarding.name.clone()),
            namespace: Some(audit.regarding.namespace.clone()),
            uid: Some(audit.regarding.uid.clone()),
            resource_version: audit.regarding.resource_version.clone(),
            field_path: None,
        }),
        related: None,
        series: None,
        deprecated_count: None,
        deprecated_first_timestamp: None,
        deprecated_last_timestamp: None,
        deprecated_source: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn pod(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_replicated_pod() {
        let pod = pod(json!({
            "metadata": {
                "name": "web-6f7c9",
                "namespace": "shop",
                "uid": "0b1c",
                "resourceVersion": "881",
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "ReplicaSet",
                    "name": "web-6f7c",
                    "uid": "aa11",
                    "controller": true
                }]
            },
            "spec": {
                "nodeName": "ip-10-0-1-7",
                "containers": [{"name": "web", "image": "nginx"}]
            },
            "status": {"phase": "Running"}
        }));

        let info = pod_info(&pod);

        assert_eq!(info.key(), "shop/web-6f7c9");
        assert_eq!(info.uid, "0b1c");
        assert_eq!(info.resource_version.as_deref(), Some("881"));
        assert_eq!(info.kind, "Pod");
        assert_eq!(info.api_version, "v1");
        assert_eq!(info.node_name.as_deref(), Some("ip-10-0-1-7"));
        assert_eq!(info.controller, ControllerKind::Managed("ReplicaSet".to_string()));
        assert!(!info.uses_local_storage);
        assert_eq!(info.phase, PodPhase::Running);
    }

    #[test]
    fn test_daemon_set_pod_with_empty_dir() {
        let pod = pod(json!({
            "metadata": {
                "name": "fluentd-x2",
                "namespace": "logging",
                "ownerReferences": [
                    {"apiVersion": "v1", "kind": "ConfigMap", "name": "c", "uid": "1"},
                    {"apiVersion": "apps/v1", "kind": "DaemonSet", "name": "fluentd", "uid": "2", "controller": true}
                ]
            },
            "spec": {
                "containers": [{"name": "fluentd"}],
                "volumes": [
                    {"name": "config", "configMap": {"name": "c"}},
                    {"name": "buffer", "emptyDir": {}}
                ]
            },
            "status": {"phase": "Succeeded"}
        }));

        let info = pod_info(&pod);

        assert_eq!(info.controller, ControllerKind::DaemonSet);
        assert!(info.uses_local_storage);
        assert!(info.phase.is_finished());
    }

    #[test]
    fn test_mirror_and_bare_pods() {
        let mirror = pod(json!({
            "metadata": {
                "name": "kube-proxy-n1",
                "namespace": "kube-system",
                "annotations": {"kubernetes.io/config.mirror": "abc"},
                "ownerReferences": [
                    {"apiVersion": "v1", "kind": "Node", "name": "n1", "uid": "3", "controller": true}
                ]
            }
        }));
        assert_eq!(pod_info(&mirror).controller, ControllerKind::Mirror);

        let bare = pod(json!({"metadata": {"name": "debug", "namespace": "default"}}));
        let info = pod_info(&bare);
        assert_eq!(info.controller, ControllerKind::None);
        assert_eq!(info.phase, PodPhase::Running);
        assert!(info.node_name.is_none());
    }

    #[test]
    fn test_node_info() {
        let node: Node = serde_json::from_value(json!({
            "metadata": {"name": "n1"},
            "spec": {"unschedulable": true}
        }))
        .unwrap();
        assert!(node_info(&node).unschedulable);

        let node: Node = serde_json::from_value(json!({"metadata": {"name": "n2"}})).unwrap();
        let info = node_info(&node);
        assert_eq!(info.name, "n2");
        assert!(!info.unschedulable);
    }

    #[test]
    fn test_event() {
        let info = PodInfo::new("shop", "web-1").with_uid("u-1");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let audit = AuditEvent::for_evicted_pod(&info, "spotd-n1", at);

        let event = event(&audit);

        assert_eq!(event.metadata.generate_name.as_deref(), Some("web-1"));
        assert_eq!(event.metadata.namespace.as_deref(), Some("shop"));
        assert_eq!(event.event_time.map(|t| t.0), Some(at));
        assert_eq!(event.type_.as_deref(), Some("Normal"));
        assert_eq!(event.reason.as_deref(), Some("SpotTermination"));
        assert_eq!(event.action.as_deref(), Some("delete pod"));
        assert_eq!(
            event.reporting_controller.as_deref(),
            Some("spotd/spot-termination-handler")
        );
        assert_eq!(event.reporting_instance.as_deref(), Some("spotd-n1"));

        let regarding = event.regarding.unwrap();
        assert_eq!(regarding.kind.as_deref(), Some("Pod"));
        assert_eq!(regarding.uid.as_deref(), Some("u-1"));
    }
}
