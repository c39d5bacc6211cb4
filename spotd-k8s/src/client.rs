//! Kubernetes Client wrapper
//!
//! Implements [`ClusterClient`] on top of the Kubernetes API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::events::v1::Event;
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use spotd_core::{AuditEvent, ClusterClient, ClusterError, NodeInfo, PodInfo};

use crate::convert;
use crate::error::classify;

/// Field manager name used for patches
const FIELD_MANAGER: &str = "spotd";

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new K8s client using in-cluster config
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        info!("Connected to Kubernetes API server");
        Ok(Self { client })
    }

    /// Get node API
    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    /// Get pods API for a namespace
    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Get all pods API
    fn pods_all(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    /// Get events API for a namespace
    fn events(&self, namespace: &str) -> Api<Event> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for K8sClient {
    async fn get_node(&self, name: &str) -> Result<NodeInfo, ClusterError> {
        let node = self
            .nodes()
            .get(name)
            .await
            .map_err(|e| classify(e, &format!("node/{}", name)))?;

        Ok(convert::node_info(&node))
    }

    async fn set_unschedulable(
        &self,
        name: &str,
        unschedulable: bool,
    ) -> Result<(), ClusterError> {
        let patch = json!({
            "spec": {
                "unschedulable": unschedulable
            }
        });

        let params = PatchParams::apply(FIELD_MANAGER);
        self.nodes()
            .patch(name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, &format!("node/{}", name)))?;

        info!(node = name, unschedulable = unschedulable, "Node schedulability updated");
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodInfo>, ClusterError> {
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));

        let pods = self
            .pods_all()
            .list(&params)
            .await
            .map_err(|e| classify(e, &format!("pods on node/{}", node_name)))?;

        debug!(node = node_name, count = pods.items.len(), "Listed pods on node");
        Ok(pods.items.iter().map(convert::pod_info).collect())
    }

    async fn evict_pod(&self, pod: &PodInfo) -> Result<(), ClusterError> {
        self.pods(&pod.namespace)
            .evict(&pod.name, &EvictParams::default())
            .await
            .map_err(|e| classify(e, &pod.key()))?;

        debug!(pod = %pod, "Eviction created");
        Ok(())
    }

    async fn delete_pod(&self, pod: &PodInfo) -> Result<(), ClusterError> {
        // Pin the delete to the UID we selected so a replacement pod with the
        // same name is never removed.
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                uid: Some(pod.uid.clone()),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };

        self.pods(&pod.namespace)
            .delete(&pod.name, &params)
            .await
            .map_err(|e| classify(e, &pod.key()))?;

        info!(pod = %pod, "Pod force deleted");
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>, ClusterError> {
        let pod = self
            .pods(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(e, &format!("{}/{}", namespace, name)))?;

        Ok(pod.as_ref().map(convert::pod_info))
    }

    async fn create_event(&self, event: &AuditEvent) -> Result<(), ClusterError> {
        self.events(&event.namespace)
            .create(&PostParams::default(), &convert::event(event))
            .await
            .map_err(|e| classify(e, &format!("event for {}/{}", event.namespace, event.regarding.name)))?;

        Ok(())
    }
}
