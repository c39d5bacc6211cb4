//! Cluster object model
//!
//! Minimal views of nodes and pods carrying only what the drain engine
//! needs to classify and evict workloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of controller managing a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerKind {
    /// Owned by a DaemonSet (rescheduled on every node regardless of cordons)
    DaemonSet,
    /// Static pod mirrored by the kubelet, not deletable through the API
    Mirror,
    /// Owned by a ReplicaSet, StatefulSet, Job or any other controller
    Managed(String),
    /// No managing controller
    None,
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerKind::DaemonSet => write!(f, "DaemonSet"),
            ControllerKind::Mirror => write!(f, "mirror"),
            ControllerKind::Managed(kind) => write!(f, "{}", kind),
            ControllerKind::None => write!(f, "none"),
        }
    }
}

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PodPhase {
    Pending,
    #[default]
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the phase string reported by the API server
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// Whether every container in the pod has terminated for good
    pub fn is_finished(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// Node identity and schedulability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub unschedulable: bool,
}

/// A workload scheduled on the node being drained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub resource_version: Option<String>,
    pub api_version: String,
    pub kind: String,
    /// Node the pod is assigned to
    pub node_name: Option<String>,
    pub controller: ControllerKind,
    /// Whether the pod mounts node-local ephemeral storage (emptyDir)
    pub uses_local_storage: bool,
    pub phase: PodPhase,
}

impl PodInfo {
    /// Create a running, controller-managed pod with no local storage
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        Self {
            uid: format!("{}-{}-uid", namespace, name),
            name,
            namespace,
            resource_version: None,
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            node_name: None,
            controller: ControllerKind::Managed("ReplicaSet".to_string()),
            uses_local_storage: false,
            phase: PodPhase::Running,
        }
    }

    pub fn on_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_controller(mut self, controller: ControllerKind) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_local_storage(mut self) -> Self {
        self.uses_local_storage = true;
        self
    }

    pub fn with_phase(mut self, phase: PodPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    /// `namespace/name`, unique within the cluster at a point in time
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for PodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse() {
        assert_eq!(PodPhase::parse("Running"), PodPhase::Running);
        assert_eq!(PodPhase::parse("Succeeded"), PodPhase::Succeeded);
        assert_eq!(PodPhase::parse("bogus"), PodPhase::Unknown);
        assert!(PodPhase::Failed.is_finished());
        assert!(!PodPhase::Pending.is_finished());
    }

    #[test]
    fn test_pod_builder() {
        let pod = PodInfo::new("default", "web-0")
            .on_node("n1")
            .with_local_storage()
            .with_controller(ControllerKind::None);

        assert_eq!(pod.key(), "default/web-0");
        assert_eq!(pod.node_name.as_deref(), Some("n1"));
        assert!(pod.uses_local_storage);
        assert_eq!(pod.controller, ControllerKind::None);
        assert_eq!(pod.to_string(), "default/web-0");
    }
}
