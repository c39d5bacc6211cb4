//! Pod Selector & Filter
//!
//! Lists the pods on the node and classifies each one against an ordered
//! chain of rules. The first rule that returns a decision wins:
//!
//! 1. the handler's own pod is skipped
//! 2. static mirror pods are skipped
//! 3. DaemonSet pods are skipped, or refused when DaemonSets are not ignored
//! 4. pods with emptyDir volumes are refused unless their data may be deleted
//! 5. unreplicated pods are refused unless forced
//!
//! Anything left is evicted. A single refusal fails the whole selection
//! before any eviction begins.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, ClusterError};
use crate::pod::{ControllerKind, PodInfo};
use crate::policy::DrainPolicy;

/// Why a pod is left on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The pod running this handler
    SelfPod,
    /// Static pod owned by the kubelet
    MirrorPod,
    /// DaemonSet pod with DaemonSets ignored
    DaemonSet,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SelfPod => write!(f, "pod runs the termination handler"),
            SkipReason::MirrorPod => write!(f, "pod is a static mirror pod"),
            SkipReason::DaemonSet => write!(f, "pod is a member of a DaemonSet"),
        }
    }
}

/// Policy rule that forbids draining the pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    DaemonSet,
    LocalStorage,
    Unreplicated,
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::DaemonSet => {
                write!(f, "pod is managed by a DaemonSet (set IGNORE_DAEMONSETS to skip)")
            }
            PolicyViolation::LocalStorage => {
                write!(f, "pod uses local storage (set DELETE_EMPTY_DIR to evict)")
            }
            PolicyViolation::Unreplicated => {
                write!(f, "pod has no managing controller (set FORCE to evict)")
            }
        }
    }
}

/// Outcome of the filter chain for one pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Evict,
    Skip(SkipReason),
    Error(PolicyViolation),
}

/// Errors that stop a drain during selection
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Listing pods failed
    #[error("failed to list pods on node {node}: {source}")]
    List {
        node: String,
        #[source]
        source: ClusterError,
    },

    /// At least one pod may not be drained under the current policy
    #[error("cannot drain node: {}", format_violations(.violations))]
    PolicyViolation {
        violations: Vec<(String, PolicyViolation)>,
    },
}

fn format_violations(violations: &[(String, PolicyViolation)]) -> String {
    violations
        .iter()
        .map(|(pod, violation)| format!("{}: {}", pod, violation))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Pods on the node paired with their decisions, in listing order
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub pods: Vec<(PodInfo, Decision)>,
}

impl Selection {
    /// Pods to hand to the eviction executor
    pub fn to_evict(&self) -> impl Iterator<Item = &PodInfo> {
        self.pods
            .iter()
            .filter(|(_, decision)| *decision == Decision::Evict)
            .map(|(pod, _)| pod)
    }

    /// Pods left in place, with the reason
    pub fn skipped(&self) -> impl Iterator<Item = (&PodInfo, SkipReason)> {
        self.pods.iter().filter_map(|(pod, decision)| match decision {
            Decision::Skip(reason) => Some((pod, *reason)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}

type PodFilter = fn(&PodInfo, &DrainPolicy) -> Option<Decision>;

/// Filter chain, most specific skip rules first
const FILTERS: [PodFilter; 5] = [
    self_filter,
    mirror_filter,
    daemon_set_filter,
    local_storage_filter,
    unreplicated_filter,
];

fn self_filter(pod: &PodInfo, policy: &DrainPolicy) -> Option<Decision> {
    (pod.name == policy.self_identity).then_some(Decision::Skip(SkipReason::SelfPod))
}

fn mirror_filter(pod: &PodInfo, _policy: &DrainPolicy) -> Option<Decision> {
    (pod.controller == ControllerKind::Mirror).then_some(Decision::Skip(SkipReason::MirrorPod))
}

fn daemon_set_filter(pod: &PodInfo, policy: &DrainPolicy) -> Option<Decision> {
    if pod.controller != ControllerKind::DaemonSet {
        return None;
    }
    if policy.ignore_daemon_sets {
        Some(Decision::Skip(SkipReason::DaemonSet))
    } else {
        Some(Decision::Error(PolicyViolation::DaemonSet))
    }
}

// Finished pods hold no running work, so the storage and controller rules do not apply.
fn local_storage_filter(pod: &PodInfo, policy: &DrainPolicy) -> Option<Decision> {
    if pod.phase.is_finished() || !pod.uses_local_storage || policy.delete_empty_dir_data {
        return None;
    }
    Some(Decision::Error(PolicyViolation::LocalStorage))
}

fn unreplicated_filter(pod: &PodInfo, policy: &DrainPolicy) -> Option<Decision> {
    if pod.phase.is_finished() || pod.controller != ControllerKind::None {
        return None;
    }
    if policy.force {
        Some(Decision::Evict)
    } else {
        Some(Decision::Error(PolicyViolation::Unreplicated))
    }
}

/// Run the filter chain for one pod
pub fn decide(pod: &PodInfo, policy: &DrainPolicy) -> Decision {
    FILTERS
        .iter()
        .find_map(|filter| filter(pod, policy))
        .unwrap_or(Decision::Evict)
}

/// Classify every listed pod, failing if any pod violates the policy
pub fn classify(
    pods: Vec<PodInfo>,
    policy: &DrainPolicy,
) -> Result<Selection, SelectionError> {
    let mut selection = Selection::default();
    let mut violations = Vec::new();

    for pod in pods {
        let decision = decide(&pod, policy);
        match decision {
            Decision::Evict => debug!(pod = %pod, "Pod selected for eviction"),
            Decision::Skip(reason) => info!(pod = %pod, reason = %reason, "Not draining pod"),
            Decision::Error(violation) => {
                warn!(pod = %pod, violation = %violation, "Pod blocks the drain");
                violations.push((pod.key(), violation));
            }
        }
        selection.pods.push((pod, decision));
    }

    if !violations.is_empty() {
        return Err(SelectionError::PolicyViolation { violations });
    }
    Ok(selection)
}

/// List the pods on a node and classify them
pub async fn select(
    cluster: &dyn ClusterClient,
    node_name: &str,
    policy: &DrainPolicy,
) -> Result<Selection, SelectionError> {
    let pods = cluster
        .list_pods_on_node(node_name)
        .await
        .map_err(|source| SelectionError::List {
            node: node_name.to_string(),
            source,
        })?;

    info!(node = node_name, count = pods.len(), "Listed pods on node");
    classify(pods, policy)
}
