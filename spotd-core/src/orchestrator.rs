//! Node Drain Orchestrator
//!
//! Top-level drain state machine:
//! IDLE → CORDONING → SELECTING → EVICTING → COMPLETED
//!
//! - CORDONING → ABORTED: the node could not be marked unschedulable; no pod is touched
//! - SELECTING → ABORTED: listing failed or a pod violates the drain policy
//! - EVICTING → COMPLETED: every attempt is terminal, whatever the mix of outcomes
//!
//! A drainer is consumed by [`NodeDrainer::drain`], so a node is drained at
//! most once per drainer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::cluster::{ClusterClient, ClusterError, SharedCluster};
use crate::executor::{AttemptState, EvictionAttempt, EvictionExecutor, ExecutorConfig};
use crate::metrics::MetricsRegistry;
use crate::policy::DrainPolicy;
use crate::reporter::EventReporter;
use crate::selector::{self, Decision, SelectionError};

/// Drain lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Cordoning,
    Selecting,
    Evicting,
    Completed,
    Aborted,
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainState::Idle => write!(f, "IDLE"),
            DrainState::Cordoning => write!(f, "CORDONING"),
            DrainState::Selecting => write!(f, "SELECTING"),
            DrainState::Evicting => write!(f, "EVICTING"),
            DrainState::Completed => write!(f, "COMPLETED"),
            DrainState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Why a drain stopped before evicting anything
#[derive(Debug, Error)]
pub enum AbortReason {
    #[error("unable to cordon node {node}: {source}")]
    Cordon {
        node: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Per-pod outcomes of a completed drain
#[derive(Debug, Clone)]
pub struct DrainSummary {
    pub node: String,
    /// One attempt per listed pod, in listing order
    pub attempts: Vec<EvictionAttempt>,
    /// Time spent in the eviction phase
    pub duration: Duration,
}

impl DrainSummary {
    pub fn count(&self, state: AttemptState) -> usize {
        self.attempts.iter().filter(|a| a.state() == state).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(AttemptState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(AttemptState::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(AttemptState::Skipped)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EvictionAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.state() == AttemptState::Failed)
    }
}

/// Terminal result of a drain
#[derive(Debug)]
pub enum DrainOutcome {
    Completed(DrainSummary),
    Aborted(AbortReason),
}

impl DrainOutcome {
    pub fn state(&self) -> DrainState {
        match self {
            DrainOutcome::Completed(_) => DrainState::Completed,
            DrainOutcome::Aborted(_) => DrainState::Aborted,
        }
    }
}

/// Mark a node unschedulable. Succeeds without patching if it already is.
pub async fn cordon(cluster: &dyn ClusterClient, node_name: &str) -> Result<(), ClusterError> {
    let node = cluster.get_node(node_name).await?;
    if node.unschedulable {
        info!(node = node_name, "Node already cordoned");
        return Ok(());
    }

    cluster.set_unschedulable(node_name, true).await?;
    info!(node = node_name, "Node cordoned");
    Ok(())
}

/// Drains one node: cordon, select, evict
pub struct NodeDrainer {
    cluster: SharedCluster,
    executor: EvictionExecutor,
    policy: DrainPolicy,
    node_name: String,
    metrics: Arc<MetricsRegistry>,
    state: DrainState,
}

impl NodeDrainer {
    pub fn new(
        cluster: SharedCluster,
        node_name: impl Into<String>,
        policy: DrainPolicy,
        config: ExecutorConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let reporter = EventReporter::new(
            cluster.clone(),
            policy.self_identity.clone(),
            metrics.clone(),
        );
        let executor = EvictionExecutor::new(cluster.clone(), reporter, metrics.clone(), config);

        Self {
            cluster,
            executor,
            policy,
            node_name: node_name.into(),
            metrics,
            state: DrainState::Idle,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    fn transition(&mut self, to: DrainState) {
        info!(
            node = %self.node_name,
            from = %self.state,
            to = %to,
            "Drain state changed"
        );
        self.state = to;
    }

    fn abort(&mut self, reason: AbortReason) -> DrainOutcome {
        error!(node = %self.node_name, reason = %reason, "Drain aborted");
        self.transition(DrainState::Aborted);
        DrainOutcome::Aborted(reason)
    }

    /// Run the drain to a terminal state
    pub async fn drain(mut self) -> DrainOutcome {
        info!(node = %self.node_name, "Draining node - spot instance is being terminated");

        self.transition(DrainState::Cordoning);
        if let Err(source) = cordon(self.cluster.as_ref(), &self.node_name).await {
            let node = self.node_name.clone();
            return self.abort(AbortReason::Cordon { node, source });
        }
        self.metrics.set_node_cordoned(true);

        self.transition(DrainState::Selecting);
        let selection =
            match selector::select(self.cluster.as_ref(), &self.node_name, &self.policy).await {
                Ok(selection) => selection,
                Err(e) => return self.abort(e.into()),
            };

        self.transition(DrainState::Evicting);
        let attempts: Vec<EvictionAttempt> = selection
            .pods
            .into_iter()
            .map(|(pod, decision)| match decision {
                Decision::Evict => EvictionAttempt::new(pod),
                Decision::Skip(_) | Decision::Error(_) => EvictionAttempt::skipped(pod),
            })
            .collect();

        let start = Instant::now();
        let deadline = self.policy.deadline(start);
        let attempts = self
            .executor
            .evict_all(attempts, &self.policy, deadline)
            .await;
        let duration = start.elapsed();

        let summary = DrainSummary {
            node: self.node_name.clone(),
            attempts,
            duration,
        };
        for _ in 0..summary.skipped() {
            self.metrics.inc_eviction(AttemptState::Skipped);
        }
        self.metrics.observe_drain_duration(duration.as_secs_f64());

        for attempt in summary.failures() {
            warn!(
                pod = %attempt.pod(),
                cause = %attempt.failure().map(|c| c.to_string()).unwrap_or_default(),
                "Pod was not relocated"
            );
        }

        self.transition(DrainState::Completed);
        info!(
            node = %self.node_name,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            duration = ?duration,
            "Drain completed"
        );
        DrainOutcome::Completed(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Call, EvictionBehavior, MockCluster};
    use crate::pod::{ControllerKind, PodInfo};

    fn drainer(cluster: Arc<MockCluster>, policy: DrainPolicy) -> NodeDrainer {
        NodeDrainer::new(
            cluster,
            "n1",
            policy,
            ExecutorConfig::default(),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn completed(outcome: DrainOutcome) -> DrainSummary {
        match outcome {
            DrainOutcome::Completed(summary) => summary,
            DrainOutcome::Aborted(reason) => panic!("drain aborted: {}", reason),
        }
    }

    fn first_index(calls: &[Call], predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        calls.iter().position(predicate)
    }

    #[tokio::test]
    async fn test_cordon_is_idempotent() {
        let cluster = MockCluster::new().with_node("n1");

        cordon(&cluster, "n1").await.unwrap();
        cordon(&cluster, "n1").await.unwrap();

        assert!(cluster.node("n1").unwrap().unschedulable);
        // The second call sees the node already cordoned and does not patch again.
        assert_eq!(
            cluster.count_calls(|c| matches!(c, Call::SetUnschedulable(..))),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_empty_node() {
        let cluster = Arc::new(MockCluster::new().with_node("n1"));

        let outcome = drainer(cluster.clone(), DrainPolicy::new("spotd-self"))
            .drain()
            .await;

        assert_eq!(outcome.state(), DrainState::Completed);
        let summary = completed(outcome);
        assert!(summary.attempts.is_empty());
        assert!(cluster.node("n1").unwrap().unschedulable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_single_replicated_pod() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_node("n1")
                .with_pod(PodInfo::new("default", "p1").on_node("n1")),
        );

        let summary = completed(
            drainer(cluster.clone(), DrainPolicy::new("spotd-self"))
                .drain()
                .await,
        );

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.attempts[0].tries(), 1);
        assert!(cluster.node("n1").unwrap().unschedulable);

        let events = cluster.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].regarding.name, "p1");

        // Cordon strictly precedes any eviction.
        let calls = cluster.calls();
        let cordoned = first_index(&calls, |c| matches!(c, Call::SetUnschedulable(..))).unwrap();
        let evicted = first_index(&calls, |c| matches!(c, Call::Evict(_))).unwrap();
        assert!(cordoned < evicted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_grace_period_drains() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_node("n1")
                .with_pod(PodInfo::new("default", "p1").on_node("n1")),
        );
        let policy = DrainPolicy {
            grace_period_seconds: u64::MAX,
            ..DrainPolicy::new("spotd-self")
        };

        let summary = completed(drainer(cluster.clone(), policy).drain().await);

        assert_eq!(summary.succeeded(), 1);
        assert!(!cluster.has_pod("default/p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_self_pod_not_evicted() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_node("n1")
                .with_pod(PodInfo::new("kube-system", "self").on_node("n1"))
                .with_pod(PodInfo::new("default", "p2").on_node("n1")),
        );

        let summary = completed(drainer(cluster.clone(), DrainPolicy::new("self")).drain().await);

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.skipped(), 1);
        let self_attempt = &summary.attempts[0];
        assert_eq!(self_attempt.pod().name, "self");
        assert_eq!(self_attempt.tries(), 0);
        assert_eq!(cluster.evictions_for("kube-system/self"), 0);
        assert!(cluster.has_pod("kube-system/self"));
        assert!(!cluster.has_pod("default/p2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_budget_denied_for_whole_grace_period() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_node("n1")
                .with_pod(PodInfo::new("default", "p1").on_node("n1"))
                .with_eviction(
                    "default/p1",
                    EvictionBehavior::Reject(ClusterError::DisruptionBudget {
                        message: "Cannot evict pod as it would violate the pod's disruption budget."
                            .to_string(),
                    }),
                ),
        );
        let mut policy = DrainPolicy::new("spotd-self");
        policy.force = false;

        let outcome = drainer(cluster.clone(), policy).drain().await;

        assert_eq!(outcome.state(), DrainState::Completed);
        let summary = completed(outcome);
        assert_eq!(summary.failed(), 1);
        let failure = summary.failures().next().unwrap();
        assert_eq!(
            failure.failure().map(|c| c.to_string()).as_deref(),
            Some("grace period exceeded")
        );
        assert!(summary.duration >= Duration::from_secs(120));
        assert!(cluster.node("n1").unwrap().unschedulable);
        assert!(cluster.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_daemon_set_violation_aborts_before_eviction() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_node("n1")
                .with_pod(PodInfo::new("default", "p1").on_node("n1"))
                .with_pod(
                    PodInfo::new("kube-system", "fluentd-x")
                        .on_node("n1")
                        .with_controller(ControllerKind::DaemonSet),
                ),
        );
        let mut policy = DrainPolicy::new("spotd-self");
        policy.ignore_daemon_sets = false;

        let outcome = drainer(cluster.clone(), policy).drain().await;

        assert_eq!(outcome.state(), DrainState::Aborted);
        assert!(matches!(
            outcome,
            DrainOutcome::Aborted(AbortReason::Selection(SelectionError::PolicyViolation { .. }))
        ));
        assert_eq!(cluster.count_calls(|c| matches!(c, Call::Evict(_))), 0);
        // Cordon is not reverted.
        assert!(cluster.node("n1").unwrap().unschedulable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cordon_failure_aborts_immediately() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_node("n1")
                .with_pod(PodInfo::new("default", "p1").on_node("n1"))
                .fail_cordon(ClusterError::Forbidden {
                    message: "nodes is forbidden".to_string(),
                }),
        );

        let outcome = drainer(cluster.clone(), DrainPolicy::new("spotd-self"))
            .drain()
            .await;

        assert!(matches!(
            outcome,
            DrainOutcome::Aborted(AbortReason::Cordon { .. })
        ));
        assert_eq!(cluster.count_calls(|c| matches!(c, Call::ListPods(_))), 0);
        assert_eq!(cluster.count_calls(|c| matches!(c, Call::Evict(_))), 0);
        assert!(!cluster.node("n1").unwrap().unschedulable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_node_aborts() {
        let cluster = Arc::new(MockCluster::new());

        let outcome = drainer(cluster.clone(), DrainPolicy::new("spotd-self"))
            .drain()
            .await;

        assert_eq!(outcome.state(), DrainState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes_complete() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_node("n1")
                .with_pod(PodInfo::new("default", "ok").on_node("n1"))
                .with_pod(PodInfo::new("default", "stuck").on_node("n1"))
                .with_pod(
                    PodInfo::new("kube-system", "etcd-n1")
                        .on_node("n1")
                        .with_controller(ControllerKind::Mirror),
                )
                .with_eviction(
                    "default/stuck",
                    EvictionBehavior::Reject(ClusterError::Forbidden {
                        message: "namespace terminating".to_string(),
                    }),
                ),
        );

        let summary = completed(
            drainer(cluster.clone(), DrainPolicy::new("spotd-self"))
                .drain()
                .await,
        );

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.skipped(), 1);
        assert!(summary.attempts.iter().all(|a| a.state().is_terminal()));
    }
}
