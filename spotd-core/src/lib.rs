//! spotd Core Library
//!
//! Drain logic for the spot instance termination handler.
//! This crate watches for the reclamation notice, selects the pods to
//! relocate, evicts them within the grace period and reports each one.
//! Cluster access goes through [`cluster::ClusterClient`].

pub mod cluster;
pub mod coordinator;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod pod;
pub mod policy;
pub mod reporter;
pub mod selector;
pub mod watcher;

// Re-export common types
pub use cluster::{ClusterClient, ClusterError, SharedCluster};
pub use coordinator::{run_until_terminated, RunOutcome};
pub use executor::{AttemptState, EvictionAttempt, EvictionExecutor, ExecutorConfig, FailureCause};
pub use metrics::MetricsRegistry;
pub use orchestrator::{cordon, AbortReason, DrainOutcome, DrainState, DrainSummary, NodeDrainer};
pub use pod::{ControllerKind, NodeInfo, PodInfo, PodPhase};
pub use policy::DrainPolicy;
pub use reporter::{AuditEvent, EventReporter, EventType, ObjectRef};
pub use selector::{Decision, PolicyViolation, Selection, SelectionError, SkipReason};
pub use watcher::{
    HttpNoticeSource, InstanceAction, NoticeResponse, NoticeSource, TerminationSignal,
    TerminationWatcher, WatchError, WatcherConfig, DEFAULT_METADATA_URL,
};
