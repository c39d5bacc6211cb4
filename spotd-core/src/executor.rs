//! Eviction Executor
//!
//! Drives every selected pod through the eviction protocol:
//!
//! Pending → Evicting → Succeeded | Failed
//!
//! - Eviction accepted: poll until the pod is gone or the deadline passes.
//! - 429 / disruption budget / transient server errors: back off
//!   exponentially and retry while time remains.
//! - Deadline reached: force delete when the policy allows it, otherwise fail.
//! - Pod already gone: succeeded. Any other rejection: failed.
//!
//! Pods are processed concurrently and never influence each other. They do
//! share one deadline: a pod still queued when it passes is finalized without
//! being evicted, and all force deletes finish within one finalization window
//! after it. The executor returns only once every attempt is terminal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterError, SharedCluster};
use crate::metrics::MetricsRegistry;
use crate::pod::PodInfo;
use crate::policy::{saturating_deadline, DrainPolicy};
use crate::reporter::EventReporter;

// Keep the request rate against the API server modest; waiting for deletion counts against this limit.
const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(20);
const DEFAULT_DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FINALIZATION_WINDOW: Duration = Duration::from_secs(10);

/// State of one pod's eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptState {
    /// Selected, no request issued yet
    Pending,
    /// Eviction requested or being retried
    Evicting,
    /// Pod confirmed gone (evicted, force deleted, or already absent)
    Succeeded,
    /// Pod could not be removed
    Failed,
    /// Pod left in place by the selector
    Skipped,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded | AttemptState::Failed | AttemptState::Skipped
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Pending => write!(f, "PENDING"),
            AttemptState::Evicting => write!(f, "EVICTING"),
            AttemptState::Succeeded => write!(f, "SUCCEEDED"),
            AttemptState::Failed => write!(f, "FAILED"),
            AttemptState::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Why an attempt ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    /// Pod still present (or budget still violated) when the deadline passed
    #[error("grace period exceeded")]
    GracePeriodExceeded,

    /// Rate limited until the deadline passed
    #[error("deadline exceeded under rate limiting")]
    RateLimited,

    /// Transient errors until the deadline passed
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(ClusterError),

    /// Non-retryable eviction error
    #[error("eviction rejected: {0}")]
    Rejected(ClusterError),

    #[error("force delete failed: {0}")]
    ForceDeleteFailed(ClusterError),

    #[error("force delete did not complete within {0:?}")]
    ForceDeleteTimedOut(Duration),
}

/// Eviction progress for one pod. Terminal states never change.
#[derive(Debug, Clone)]
pub struct EvictionAttempt {
    pod: PodInfo,
    tries: u32,
    last_error: Option<ClusterError>,
    failure: Option<FailureCause>,
    state: AttemptState,
}

impl EvictionAttempt {
    /// Attempt for a pod selected for eviction
    pub fn new(pod: PodInfo) -> Self {
        Self {
            pod,
            tries: 0,
            last_error: None,
            failure: None,
            state: AttemptState::Pending,
        }
    }

    /// Attempt for a pod the selector left in place
    pub fn skipped(pod: PodInfo) -> Self {
        Self {
            state: AttemptState::Skipped,
            ..Self::new(pod)
        }
    }

    pub fn pod(&self) -> &PodInfo {
        &self.pod
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Number of eviction requests issued
    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn last_error(&self) -> Option<&ClusterError> {
        self.last_error.as_ref()
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        self.failure.as_ref()
    }

    fn begin(&mut self) -> bool {
        if self.state != AttemptState::Pending {
            return false;
        }
        self.state = AttemptState::Evicting;
        true
    }

    fn finish(&mut self, to: AttemptState) -> bool {
        if self.state.is_terminal() {
            warn!(
                pod = %self.pod,
                state = %self.state,
                rejected = %to,
                "Ignoring transition out of terminal state"
            );
            return false;
        }
        self.state = to;
        true
    }

    fn succeed(&mut self) {
        self.finish(AttemptState::Succeeded);
    }

    fn fail(&mut self, cause: FailureCause) {
        if self.finish(AttemptState::Failed) {
            self.failure = Some(cause);
        }
    }
}

/// Executor tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of pods evicted at the same time
    pub concurrency: usize,
    /// First retry delay after a retryable rejection
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay
    pub max_backoff: Duration,
    /// Poll interval while waiting for an evicted pod to disappear
    pub deletion_check_interval: Duration,
    /// Time allowed for the force delete issued after the deadline
    pub finalization_window: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            deletion_check_interval: DEFAULT_DELETION_CHECK_INTERVAL,
            finalization_window: DEFAULT_FINALIZATION_WINDOW,
        }
    }
}

impl ExecutorConfig {
    /// Retry delays doubling from `initial_backoff`, capped at `max_backoff`
    pub fn backoff_schedule(&self) -> impl Iterator<Item = Duration> {
        let initial_ms = (self.initial_backoff.as_millis() as u64).max(2);
        ExponentialBackoff::from_millis(2)
            .factor(initial_ms / 2)
            .max_delay(self.max_backoff)
    }
}

/// Runs eviction attempts against the cluster
pub struct EvictionExecutor {
    cluster: SharedCluster,
    reporter: EventReporter,
    metrics: Arc<MetricsRegistry>,
    config: ExecutorConfig,
}

impl EvictionExecutor {
    pub fn new(
        cluster: SharedCluster,
        reporter: EventReporter,
        metrics: Arc<MetricsRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            cluster,
            reporter,
            metrics,
            config,
        }
    }

    /// Drive every attempt to a terminal state, bounded by `deadline`.
    ///
    /// The deadline is shared by the whole drain: pods still queued behind
    /// the concurrency limit when it passes go straight to finalization, and
    /// every force delete must finish within one `finalization_window` after
    /// it. Results are returned in input order. Attempts that are already
    /// terminal (skipped pods) pass through untouched.
    pub async fn evict_all(
        &self,
        attempts: Vec<EvictionAttempt>,
        policy: &DrainPolicy,
        deadline: Instant,
    ) -> Vec<EvictionAttempt> {
        let cutoff = saturating_deadline(deadline, self.config.finalization_window);

        stream::iter(attempts)
            .map(|attempt| self.run_attempt(attempt, policy, deadline, cutoff))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    async fn run_attempt(
        &self,
        mut attempt: EvictionAttempt,
        policy: &DrainPolicy,
        deadline: Instant,
        cutoff: Instant,
    ) -> EvictionAttempt {
        if !attempt.begin() {
            return attempt;
        }

        let pod = attempt.pod.clone();

        if Instant::now() >= deadline {
            warn!(pod = %pod, "Grace period over before eviction started");
            self.finalize(&mut attempt, policy, FailureCause::GracePeriodExceeded, cutoff)
                .await;
            self.metrics.inc_eviction(attempt.state);
            return attempt;
        }

        let mut backoff = self.config.backoff_schedule();

        loop {
            attempt.tries += 1;
            info!(pod = %pod, attempt = attempt.tries, "Attempting to evict pod");

            let response = match timeout_at(deadline, self.cluster.evict_pod(&pod)).await {
                Ok(response) => response,
                Err(_) => {
                    warn!(pod = %pod, "Eviction request still pending at the deadline");
                    self.finalize(&mut attempt, policy, FailureCause::GracePeriodExceeded, cutoff)
                        .await;
                    break;
                }
            };

            match response {
                Ok(()) => {
                    info!(pod = %pod, "Eviction accepted");
                    self.await_removal(&mut attempt, policy, deadline, cutoff).await;
                    break;
                }
                Err(e) if e.is_not_found() => {
                    info!(pod = %pod, "Pod already gone");
                    attempt.succeed();
                    break;
                }
                Err(e) if e.is_retryable() => {
                    self.metrics.inc_eviction_retry(e.label());
                    let cause = match &e {
                        ClusterError::TooManyRequests { .. } => FailureCause::RateLimited,
                        ClusterError::DisruptionBudget { .. } => FailureCause::GracePeriodExceeded,
                        other => FailureCause::DeadlineExceeded(other.clone()),
                    };
                    attempt.last_error = Some(e.clone());

                    let now = Instant::now();
                    if now >= deadline {
                        self.finalize(&mut attempt, policy, cause, cutoff).await;
                        break;
                    }

                    let delay = backoff
                        .next()
                        .unwrap_or(self.config.max_backoff)
                        .min(deadline - now);
                    warn!(
                        pod = %pod,
                        attempt = attempt.tries,
                        error = %e,
                        retry_in = ?delay,
                        "Eviction rejected, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(pod = %pod, error = %e, "Eviction failed with a non-retryable error");
                    attempt.last_error = Some(e.clone());
                    attempt.fail(FailureCause::Rejected(e));
                    break;
                }
            }
        }

        self.metrics.inc_eviction(attempt.state);
        attempt
    }

    /// Poll until the evicted pod is gone or the deadline passes
    async fn await_removal(
        &self,
        attempt: &mut EvictionAttempt,
        policy: &DrainPolicy,
        deadline: Instant,
        cutoff: Instant,
    ) {
        let pod = attempt.pod.clone();

        loop {
            let lookup = match timeout_at(deadline, self.cluster.get_pod(&pod.namespace, &pod.name)).await {
                Ok(lookup) => lookup,
                Err(_) => {
                    self.finalize(attempt, policy, FailureCause::GracePeriodExceeded, cutoff)
                        .await;
                    return;
                }
            };

            match lookup {
                Ok(None) => {
                    info!(pod = %pod, "Pod deleted");
                    self.complete(attempt).await;
                    return;
                }
                // Same name, new incarnation: the pod we evicted is gone.
                Ok(Some(current)) if current.uid != pod.uid => {
                    info!(pod = %pod, "Pod replaced by a new instance");
                    self.complete(attempt).await;
                    return;
                }
                Ok(Some(_)) => {
                    debug!(pod = %pod, "Pod not yet deleted");
                }
                Err(e) => {
                    warn!(pod = %pod, error = %e, "Could not determine if pod has been deleted");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.finalize(attempt, policy, FailureCause::GracePeriodExceeded, cutoff)
                    .await;
                return;
            }
            sleep(self.config.deletion_check_interval.min(deadline - now)).await;
        }
    }

    /// Deadline reached: force delete if allowed, otherwise fail with `cause`.
    ///
    /// The delete must complete before `cutoff`, the end of the drain's
    /// single finalization window.
    async fn finalize(
        &self,
        attempt: &mut EvictionAttempt,
        policy: &DrainPolicy,
        cause: FailureCause,
        cutoff: Instant,
    ) {
        let pod = attempt.pod.clone();

        if !policy.force {
            error!(pod = %pod, cause = %cause, "Giving up on pod");
            attempt.fail(cause);
            return;
        }

        warn!(pod = %pod, cause = %cause, "Deadline reached, deleting pod unconditionally");
        let window = self.config.finalization_window;
        match timeout_at(cutoff, self.cluster.delete_pod(&pod)).await {
            Ok(Ok(())) => self.complete(attempt).await,
            Ok(Err(e)) if e.is_not_found() => {
                info!(pod = %pod, "Pod already gone");
                attempt.succeed();
            }
            // Delete carries a UID precondition, a conflict means a different pod now holds the name.
            Ok(Err(ClusterError::Conflict { .. })) => {
                info!(pod = %pod, "Pod replaced by a new instance");
                attempt.succeed();
            }
            Ok(Err(e)) => {
                error!(pod = %pod, error = %e, "Force delete failed");
                attempt.last_error = Some(e.clone());
                attempt.fail(FailureCause::ForceDeleteFailed(e));
            }
            Err(_) => {
                error!(pod = %pod, window = ?window, "Force delete timed out");
                attempt.fail(FailureCause::ForceDeleteTimedOut(window));
            }
        }
    }

    /// Report the eviction, then mark it succeeded
    async fn complete(&self, attempt: &mut EvictionAttempt) {
        self.reporter.record(&attempt.pod).await;
        attempt.succeed();
    }
}
