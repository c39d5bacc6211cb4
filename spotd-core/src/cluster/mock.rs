//! In-memory cluster for testing

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ClusterClient, ClusterError};
use crate::pod::{NodeInfo, PodInfo};
use crate::reporter::AuditEvent;

/// Scripted response to eviction requests for one pod
#[derive(Debug, Clone)]
pub enum EvictionBehavior {
    /// Accept the eviction and remove the pod immediately
    Remove,
    /// Accept the eviction but leave the pod in place
    Linger,
    /// Reject every eviction with the given error
    Reject(ClusterError),
    /// Reject the first `n` evictions, then accept and remove the pod
    RejectTimes(u32, ClusterError),
}

/// A recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetNode(String),
    SetUnschedulable(String, bool),
    ListPods(String),
    Evict(String),
    Delete(String),
    GetPod(String),
    CreateEvent(String),
}

#[derive(Default)]
struct MockState {
    nodes: HashMap<String, NodeInfo>,
    pods: Vec<PodInfo>,
    behaviors: HashMap<String, EvictionBehavior>,
    eviction_counts: HashMap<String, u32>,
    calls: Vec<Call>,
    events: Vec<AuditEvent>,
    cordon_error: Option<ClusterError>,
    list_error: Option<ClusterError>,
    delete_error: Option<ClusterError>,
    event_error: Option<ClusterError>,
}

/// Mock cluster holding nodes and pods in memory
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a schedulable node
    pub fn with_node(self, name: &str) -> Self {
        self.state().nodes.insert(
            name.to_string(),
            NodeInfo {
                name: name.to_string(),
                unschedulable: false,
            },
        );
        self
    }

    /// Add a pod
    pub fn with_pod(self, pod: PodInfo) -> Self {
        self.state().pods.push(pod);
        self
    }

    /// Script eviction responses for the pod with the given `namespace/name` key
    pub fn with_eviction(self, key: &str, behavior: EvictionBehavior) -> Self {
        self.state().behaviors.insert(key.to_string(), behavior);
        self
    }

    pub fn fail_cordon(self, error: ClusterError) -> Self {
        self.state().cordon_error = Some(error);
        self
    }

    pub fn fail_list(self, error: ClusterError) -> Self {
        self.state().list_error = Some(error);
        self
    }

    pub fn fail_delete(self, error: ClusterError) -> Self {
        self.state().delete_error = Some(error);
        self
    }

    pub fn fail_events(self, error: ClusterError) -> Self {
        self.state().event_error = Some(error);
        self
    }

    pub fn node(&self, name: &str) -> Option<NodeInfo> {
        self.state().nodes.get(name).cloned()
    }

    pub fn has_pod(&self, key: &str) -> bool {
        self.state().pods.iter().any(|p| p.key() == key)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.state().events.clone()
    }

    /// Number of eviction requests issued for a pod
    pub fn evictions_for(&self, key: &str) -> u32 {
        self.state().eviction_counts.get(key).copied().unwrap_or(0)
    }

    /// Number of recorded calls matching the predicate
    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| predicate(c)).count()
    }

    fn remove_pod(state: &mut MockState, key: &str) {
        state.pods.retain(|p| p.key() != key);
    }
}

fn pod_not_found(key: &str) -> ClusterError {
    ClusterError::NotFound {
        resource: format!("pods \"{}\"", key),
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get_node(&self, name: &str) -> Result<NodeInfo, ClusterError> {
        let mut state = self.state();
        state.calls.push(Call::GetNode(name.to_string()));
        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                resource: format!("nodes \"{}\"", name),
            })
    }

    async fn set_unschedulable(
        &self,
        name: &str,
        unschedulable: bool,
    ) -> Result<(), ClusterError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::SetUnschedulable(name.to_string(), unschedulable));
        if let Some(err) = state.cordon_error.clone() {
            return Err(err);
        }
        match state.nodes.get_mut(name) {
            Some(node) => {
                node.unschedulable = unschedulable;
                Ok(())
            }
            None => Err(ClusterError::NotFound {
                resource: format!("nodes \"{}\"", name),
            }),
        }
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodInfo>, ClusterError> {
        let mut state = self.state();
        state.calls.push(Call::ListPods(node_name.to_string()));
        if let Some(err) = state.list_error.clone() {
            return Err(err);
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| p.node_name.as_deref() == Some(node_name))
            .cloned()
            .collect())
    }

    async fn evict_pod(&self, pod: &PodInfo) -> Result<(), ClusterError> {
        let key = pod.key();
        let mut state = self.state();
        state.calls.push(Call::Evict(key.clone()));
        let count = {
            let count = state.eviction_counts.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if !state.pods.iter().any(|p| p.key() == key) {
            return Err(pod_not_found(&key));
        }

        let behavior = state
            .behaviors
            .get(&key)
            .cloned()
            .unwrap_or(EvictionBehavior::Remove);
        match behavior {
            EvictionBehavior::Remove => {
                Self::remove_pod(&mut state, &key);
                Ok(())
            }
            EvictionBehavior::Linger => Ok(()),
            EvictionBehavior::Reject(err) => Err(err),
            EvictionBehavior::RejectTimes(times, err) => {
                if count <= times {
                    Err(err)
                } else {
                    Self::remove_pod(&mut state, &key);
                    Ok(())
                }
            }
        }
    }

    async fn delete_pod(&self, pod: &PodInfo) -> Result<(), ClusterError> {
        let key = pod.key();
        let mut state = self.state();
        state.calls.push(Call::Delete(key.clone()));
        if let Some(err) = state.delete_error.clone() {
            return Err(err);
        }
        if !state.pods.iter().any(|p| p.key() == key) {
            return Err(pod_not_found(&key));
        }
        Self::remove_pod(&mut state, &key);
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>, ClusterError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::GetPod(format!("{}/{}", namespace, name)));
        Ok(state
            .pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned())
    }

    async fn create_event(&self, event: &AuditEvent) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.calls.push(Call::CreateEvent(format!(
            "{}/{}",
            event.regarding.namespace, event.regarding.name
        )));
        if let Some(err) = state.event_error.clone() {
            return Err(err);
        }
        state.events.push(event.clone());
        Ok(())
    }
}
