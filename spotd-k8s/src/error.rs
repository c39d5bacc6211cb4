//! API error classification
//!
//! Maps `kube::Error` onto the client-agnostic [`ClusterError`] taxonomy the
//! drain engine reasons about.

use spotd_core::ClusterError;

/// Substring the API server puts in eviction denials caused by a disruption budget
const DISRUPTION_BUDGET_MARKER: &str = "disruption budget";

/// Classify a Kubernetes client error.
///
/// `resource` names the object the request addressed and is only used for
/// the not-found message.
pub fn classify(err: kube::Error, resource: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) => classify_status(response.code, response.message, resource),
        other => ClusterError::Transport(other.to_string()),
    }
}

fn classify_status(code: u16, message: String, resource: &str) -> ClusterError {
    let budget = message.to_lowercase().contains(DISRUPTION_BUDGET_MARKER);

    match code {
        404 => ClusterError::NotFound {
            resource: resource.to_string(),
        },
        // A misconfigured budget (several budgets selecting one pod) is reported as a 500.
        429 | 500 if budget => ClusterError::DisruptionBudget { message },
        429 => ClusterError::TooManyRequests { message },
        403 => ClusterError::Forbidden { message },
        409 => ClusterError::Conflict { message },
        code => ClusterError::Api { code, message },
    }
}
