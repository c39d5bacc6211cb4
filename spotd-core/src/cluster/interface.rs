//! Cluster client trait and error classification

use async_trait::async_trait;
use thiserror::Error;

use crate::pod::{NodeInfo, PodInfo};
use crate::reporter::AuditEvent;

/// Classified failure of a control-plane request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// Object does not exist (or no longer exists)
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Request rejected by server-side rate limiting
    #[error("too many requests: {message}")]
    TooManyRequests { message: String },

    /// Eviction would violate a disruption budget
    #[error("disruption budget prevents eviction: {message}")]
    DisruptionBudget { message: String },

    /// Request not permitted (RBAC, terminating namespace, ...)
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Precondition or resource version conflict
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Any other API status
    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    /// Connection, TLS, or decoding failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    /// Whether the same request may succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::TooManyRequests { .. }
            | ClusterError::DisruptionBudget { .. }
            | ClusterError::Transport(_) => true,
            ClusterError::Api { code, .. } => *code >= 500,
            ClusterError::NotFound { .. }
            | ClusterError::Forbidden { .. }
            | ClusterError::Conflict { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    /// Short label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            ClusterError::NotFound { .. } => "not_found",
            ClusterError::TooManyRequests { .. } => "rate_limited",
            ClusterError::DisruptionBudget { .. } => "disruption_budget",
            ClusterError::Forbidden { .. } => "forbidden",
            ClusterError::Conflict { .. } => "conflict",
            ClusterError::Api { .. } => "api",
            ClusterError::Transport(_) => "transport",
        }
    }
}

/// Control-plane operations consumed by the drain engine
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Read a node by name
    async fn get_node(&self, name: &str) -> Result<NodeInfo, ClusterError>;

    /// Set the node's unschedulable flag
    async fn set_unschedulable(&self, name: &str, unschedulable: bool)
        -> Result<(), ClusterError>;

    /// List every pod assigned to the node
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodInfo>, ClusterError>;

    /// Create a disruption-budget-aware eviction for the pod
    async fn evict_pod(&self, pod: &PodInfo) -> Result<(), ClusterError>;

    /// Delete the pod unconditionally, bypassing disruption budgets
    async fn delete_pod(&self, pod: &PodInfo) -> Result<(), ClusterError>;

    /// Read a pod, returning `None` when it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>, ClusterError>;

    /// Submit an audit event
    async fn create_event(&self, event: &AuditEvent) -> Result<(), ClusterError>;
}
