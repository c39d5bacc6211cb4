//! Drain policy
//!
//! Immutable set of switches deciding which pods may be relocated and how
//! hard the engine pushes when the API server pushes back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Default per-pod eviction deadline in seconds
pub const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 120;

/// Stand-in for "no deadline" when the grace period does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`, saturating at a far-future instant instead of overflowing
pub fn saturating_deadline(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Drain policy, built once at startup and shared read-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainPolicy {
    /// Allow unconditional deletes after the deadline and eviction of unreplicated pods
    pub force: bool,
    /// Eviction deadline
    pub grace_period_seconds: u64,
    /// Skip DaemonSet pods instead of refusing to drain
    pub ignore_daemon_sets: bool,
    /// Allow eviction of pods using emptyDir volumes
    pub delete_empty_dir_data: bool,
    /// Name of the pod running this handler, never evicted
    pub self_identity: String,
}

impl DrainPolicy {
    /// Policy with the default switches for the given self identity
    pub fn new(self_identity: impl Into<String>) -> Self {
        Self {
            force: true,
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            ignore_daemon_sets: true,
            delete_empty_dir_data: true,
            self_identity: self_identity.into(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    /// Eviction deadline for a drain whose eviction phase begins at `start`
    pub fn deadline(&self, start: Instant) -> Instant {
        saturating_deadline(start, self.grace_period())
    }
}
