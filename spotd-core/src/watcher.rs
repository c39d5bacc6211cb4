//! Termination Signal Watcher
//!
//! Polls the instance metadata endpoint for a spot interruption notice:
//! - transport error: wait `error_backoff` (1s) and poll again
//! - any status other than 200: wait `not_ready_backoff` (5s) and poll again
//! - 200: fire the termination signal once and stop polling for good
//!
//! Polling stops without a signal when the cancel channel flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::coordinator::cancelled;
use crate::metrics::MetricsRegistry;

/// Spot instance-action endpoint of the EC2 instance metadata service
pub const DEFAULT_METADATA_URL: &str =
    "http://169.254.169.254/latest/meta-data/spot/instance-action";

const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_NOT_READY_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors raised while polling the notice source
#[derive(Debug, Error)]
pub enum WatchError {
    /// Connection refused, timeout, DNS failure, ...
    #[error("termination notice request failed: {0}")]
    Transport(String),

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Response from one poll of the notice source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeResponse {
    /// Reclamation is imminent
    Imminent { body: String },
    /// No notice yet
    NotReady { status: u16 },
}

/// Source of the reclamation notice
#[async_trait]
pub trait NoticeSource: Send + Sync {
    async fn poll(&self) -> Result<NoticeResponse, WatchError>;
}

/// Polls an HTTP endpoint reachable only from the node
pub struct HttpNoticeSource {
    client: reqwest::Client,
    url: String,
}

impl HttpNoticeSource {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, WatchError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WatchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NoticeSource for HttpNoticeSource {
    async fn poll(&self) -> Result<NoticeResponse, WatchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| WatchError::Transport(e.to_string()))?;

        let status = response.status();
        // Read the body either way so the connection can be reused.
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::OK {
            Ok(NoticeResponse::Imminent { body })
        } else {
            Ok(NoticeResponse::NotReady {
                status: status.as_u16(),
            })
        }
    }
}

/// Instance-action document returned with the notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAction {
    /// `terminate`, `stop` or `hibernate`
    pub action: String,
    /// When the provider will act
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl InstanceAction {
    /// Best-effort parse of the notice body
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

/// One-shot "terminate now" signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationSignal {
    pub fired_at: DateTime<Utc>,
    pub notice: Option<InstanceAction>,
}

/// Poll cadence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Delay after a transport error
    pub error_backoff: Duration,
    /// Delay after a non-200 response
    pub not_ready_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            error_backoff: DEFAULT_ERROR_BACKOFF,
            not_ready_backoff: DEFAULT_NOT_READY_BACKOFF,
        }
    }
}

impl WatcherConfig {
    /// Default per-request timeout for [`HttpNoticeSource`]
    pub fn default_request_timeout() -> Duration {
        DEFAULT_REQUEST_TIMEOUT
    }
}

/// Watches the notice source until reclamation is announced
pub struct TerminationWatcher<S: NoticeSource> {
    source: S,
    config: WatcherConfig,
    metrics: Arc<MetricsRegistry>,
}

impl<S: NoticeSource + 'static> TerminationWatcher<S> {
    pub fn new(source: S, config: WatcherConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            source,
            config,
            metrics,
        }
    }

    /// Poll until the notice arrives (`Some`) or `cancel` becomes `true` (`None`).
    ///
    /// Consumes the watcher, so the signal fires at most once.
    pub async fn watch(self, mut cancel: watch::Receiver<bool>) -> Option<TerminationSignal> {
        info!(
            error_backoff = ?self.config.error_backoff,
            not_ready_backoff = ?self.config.not_ready_backoff,
            "Watching for spot termination notice"
        );

        loop {
            let response = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    info!("Shutdown requested, termination watcher stopped");
                    return None;
                }
                response = self.source.poll() => response,
            };

            let delay = match response {
                Ok(NoticeResponse::Imminent { body }) => {
                    self.metrics.inc_notice_poll("imminent");
                    let notice = InstanceAction::parse(&body);
                    info!(notice = ?notice, "Spot termination notice received");
                    return Some(TerminationSignal {
                        fired_at: Utc::now(),
                        notice,
                    });
                }
                Ok(NoticeResponse::NotReady { status }) => {
                    self.metrics.inc_notice_poll("not_ready");
                    debug!(status = status, "No termination notice yet");
                    self.config.not_ready_backoff
                }
                Err(e) => {
                    self.metrics.inc_notice_poll("error");
                    warn!(error = %e, "Termination notice poll failed");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    info!("Shutdown requested, termination watcher stopped");
                    return None;
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Run [`watch`](Self::watch) on a background task
    pub fn spawn(self, cancel: watch::Receiver<bool>) -> JoinHandle<Option<TerminationSignal>> {
        tokio::spawn(self.watch(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted responses, then keeps answering "not ready"
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<NoticeResponse, WatchError>>>,
        polls: Arc<AtomicU32>,
    }

    impl ScriptedSource {
        fn new(errors: u32, not_ready: u32, then_imminent: bool) -> (Self, Arc<AtomicU32>) {
            let mut script = VecDeque::new();
            for _ in 0..errors {
                script.push_back(Err(WatchError::Transport("connection refused".to_string())));
            }
            for _ in 0..not_ready {
                script.push_back(Ok(NoticeResponse::NotReady { status: 404 }));
            }
            if then_imminent {
                script.push_back(Ok(NoticeResponse::Imminent {
                    body: r#"{"action": "terminate", "time": "2024-05-01T12:02:00Z"}"#
                        .to_string(),
                }));
            }
            let polls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    script: Mutex::new(script),
                    polls: polls.clone(),
                },
                polls,
            )
        }
    }

    #[async_trait]
    impl NoticeSource for ScriptedSource {
        async fn poll(&self) -> Result<NoticeResponse, WatchError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(NoticeResponse::NotReady { status: 404 }))
        }
    }

    fn watcher(source: ScriptedSource) -> TerminationWatcher<ScriptedSource> {
        TerminationWatcher::new(
            source,
            WatcherConfig::default(),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_backoffs() {
        for (errors, not_ready) in [(0, 0), (3, 0), (0, 2), (2, 3)] {
            let (source, polls) = ScriptedSource::new(errors, not_ready, true);
            let (_tx, rx) = watch::channel(false);
            let start = Instant::now();

            let signal = watcher(source).watch(rx).await;

            let min_wait = Duration::from_secs(u64::from(errors) + 5 * u64::from(not_ready));
            assert!(signal.is_some());
            assert!(start.elapsed() >= min_wait);
            assert_eq!(polls.load(Ordering::SeqCst), errors + not_ready + 1);

            // No further polling once the signal has fired.
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert_eq!(polls.load(Ordering::SeqCst), errors + not_ready + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_carries_notice() {
        let (source, _) = ScriptedSource::new(0, 0, true);
        let (_tx, rx) = watch::channel(false);

        let signal = watcher(source).watch(rx).await.unwrap();

        let notice = signal.notice.unwrap();
        assert_eq!(notice.action, "terminate");
        assert!(notice.time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_notice() {
        let (source, polls) = ScriptedSource::new(0, 0, false);
        let (tx, rx) = watch::channel(false);

        let handle = watcher(source).spawn(rx);
        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();

        let signal = handle.await.unwrap();
        assert!(signal.is_none());

        let polled = polls.load(Ordering::SeqCst);
        assert!(polled >= 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(polls.load(Ordering::SeqCst), polled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled() {
        let (source, polls) = ScriptedSource::new(0, 0, true);
        let (_tx, rx) = watch::channel(true);

        assert!(watcher(source).watch(rx).await.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_instance_action_parse() {
        let action = InstanceAction::parse(r#"{"action":"stop","time":"2024-05-01T12:02:00Z"}"#)
            .unwrap();
        assert_eq!(action.action, "stop");

        assert!(InstanceAction::parse("not json").is_none());
    }
}
