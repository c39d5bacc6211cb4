//! Spot termination handler (spotd)
//!
//! Runs as a DaemonSet on spot nodes. Watches the instance metadata service
//! for the reclamation notice, then cordons the node and relocates its pods
//! before the instance disappears.

mod cli;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;
use config::Config;
use spotd_core::{
    run_until_terminated, ClusterClient, DrainOutcome, HttpNoticeSource, MetricsRegistry,
    NodeDrainer, RunOutcome, SharedCluster, TerminationWatcher,
};
use spotd_k8s::K8sClient;

/// Initialize the tracing/logging subsystem
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Flip the shutdown channel on Ctrl+C or SIGTERM
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating shutdown");
            }
        }

        let _ = shutdown_tx.send(true);
    });
}

/// Start the Prometheus metrics HTTP server
async fn start_metrics_server(port: u16) -> Result<()> {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = port, "Metrics server listening");

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            let _ = socket.read(&mut buf).await;

            let metrics_output = prometheus::TextEncoder::new()
                .encode_to_string(&prometheus::gather())
                .unwrap_or_default();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                metrics_output.len(),
                metrics_output
            );

            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

/// Wait for the notice and drain the node
async fn run(cli: Cli, config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let policy = cli.policy();
    info!(
        node = %cli.node_name,
        pod = %policy.self_identity,
        force = policy.force,
        grace_period_seconds = policy.grace_period_seconds,
        ignore_daemon_sets = policy.ignore_daemon_sets,
        delete_empty_dir_data = policy.delete_empty_dir_data,
        "Drain policy"
    );

    let k8s_client = K8sClient::new().await?;
    // The node must exist before we start watching for its reclamation.
    k8s_client
        .get_node(&cli.node_name)
        .await
        .with_context(|| format!("Failed to get node: {}", cli.node_name))?;
    let cluster: SharedCluster = Arc::new(k8s_client);

    let metrics = Arc::new(MetricsRegistry::new());

    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let source = HttpNoticeSource::new(cli.metadata_url.clone(), config.watcher.request_timeout)
        .context("Failed to create termination notice client")?;
    info!(url = %source.url(), "Using instance metadata endpoint");

    let watcher = TerminationWatcher::new(source, config.watcher_config(), metrics.clone());
    let drainer = NodeDrainer::new(
        cluster,
        cli.node_name.clone(),
        policy,
        config.executor_config(),
        metrics,
    );

    match run_until_terminated(watcher, drainer, shutdown_rx).await {
        RunOutcome::ShutdownBeforeSignal => {
            info!("spotd shutdown complete");
            Ok(())
        }
        RunOutcome::WatcherStopped(reason) => {
            anyhow::bail!("termination watcher stopped: {}", reason)
        }
        RunOutcome::Drained {
            outcome: DrainOutcome::Completed(summary),
            ..
        } => {
            if summary.failed() > 0 {
                warn!(
                    node = %summary.node,
                    failed = summary.failed(),
                    "Drain completed with pods left behind"
                );
            }
            info!("spotd drain complete");
            Ok(())
        }
        RunOutcome::Drained {
            outcome: DrainOutcome::Aborted(reason),
            ..
        } => Err(anyhow::Error::new(reason).context("Drain aborted")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "spotd starting");

    // Load configuration
    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        info!(path = ?cli.config, "Config file not found, using defaults");
        Config::default()
    };

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    // Setup shutdown signal handler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    run(cli, config, shutdown_rx).await
}
