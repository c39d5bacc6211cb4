//! Cluster access layer
//!
//! The drain engine talks to the control plane only through [`ClusterClient`].
//! Implementations must tolerate concurrent calls from many in-flight
//! evictions.

mod interface;
mod mock;

pub use interface::*;
pub use mock::{Call, EvictionBehavior, MockCluster};

use std::sync::Arc;

/// Shared handle used by every drain component
pub type SharedCluster = Arc<dyn ClusterClient>;
