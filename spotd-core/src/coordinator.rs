//! Cancellation Coordinator
//!
//! Ties the process shutdown channel to the termination watcher and the
//! drain. Shutdown before the notice stops polling and nothing touches the
//! cluster. Once the notice has fired the drain runs to completion; a later
//! shutdown request does not interrupt it.

use std::future::pending;

use tokio::sync::watch;
use tracing::{error, info};

use crate::orchestrator::{DrainOutcome, NodeDrainer};
use crate::watcher::{NoticeSource, TerminationSignal, TerminationWatcher};

/// Resolves once the channel holds `true`.
///
/// A dropped sender can never cancel, so this then waits forever.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|cancel| *cancel).await.is_err();
    if closed {
        pending::<()>().await;
    }
}

/// How a handler run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Shutdown arrived first; the node was left untouched
    ShutdownBeforeSignal,
    /// The watcher task died without producing a signal
    WatcherStopped(String),
    /// The notice fired and the drain ran
    Drained {
        signal: TerminationSignal,
        outcome: DrainOutcome,
    },
}

/// Wait for the termination notice, then drain the node exactly once.
pub async fn run_until_terminated<S>(
    watcher: TerminationWatcher<S>,
    drainer: NodeDrainer,
    shutdown: watch::Receiver<bool>,
) -> RunOutcome
where
    S: NoticeSource + 'static,
{
    // The watcher observes the shutdown channel itself, so its result is
    // the single decision point between "drain" and "leave".
    let signal = match watcher.spawn(shutdown).await {
        Ok(Some(signal)) => signal,
        Ok(None) => {
            info!(node = %drainer.node_name(), "Shutdown before termination notice, node left untouched");
            return RunOutcome::ShutdownBeforeSignal;
        }
        Err(e) => {
            error!(error = %e, "Termination watcher task failed");
            return RunOutcome::WatcherStopped(e.to_string());
        }
    };

    info!(
        node = %drainer.node_name(),
        fired_at = %signal.fired_at,
        "Termination notice received, draining node"
    );

    let outcome = drainer.drain().await;

    RunOutcome::Drained { signal, outcome }
}
