//! Configuration module for spotd
//!
//! Optional YAML tuning file for poll cadence, eviction pacing and metrics.
//! Drain policy switches come from the environment (see `cli`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spotd_core::{ExecutorConfig, WatcherConfig};

/// Termination notice polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSection {
    /// Delay after a failed request
    #[serde(with = "humantime_serde", default = "default_error_backoff")]
    pub error_backoff: Duration,

    /// Delay after a response without a notice
    #[serde(with = "humantime_serde", default = "default_not_ready_backoff")]
    pub not_ready_backoff: Duration,

    /// Per-request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            error_backoff: default_error_backoff(),
            not_ready_backoff: default_not_ready_backoff(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Eviction pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionSection {
    /// Pods evicted at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// First retry delay
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    /// Retry delay cap
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,

    /// Poll interval while waiting for an evicted pod to go away
    #[serde(with = "humantime_serde", default = "default_deletion_check_interval")]
    pub deletion_check_interval: Duration,

    /// Time allowed for a force delete after the grace period
    #[serde(with = "humantime_serde", default = "default_finalization_window")]
    pub finalization_window: Duration,
}

impl Default for EvictionSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            deletion_check_interval: default_deletion_check_interval(),
            finalization_window: default_finalization_window(),
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port to expose metrics on
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watcher: WatcherSection,

    #[serde(default)]
    pub eviction: EvictionSection,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.watcher.error_backoff.is_zero() {
            anyhow::bail!("watcher.error_backoff must be > 0");
        }
        if self.watcher.not_ready_backoff.is_zero() {
            anyhow::bail!("watcher.not_ready_backoff must be > 0");
        }
        if self.watcher.request_timeout.is_zero() {
            anyhow::bail!("watcher.request_timeout must be > 0");
        }
        if self.eviction.concurrency == 0 {
            anyhow::bail!("eviction.concurrency must be > 0");
        }
        if self.eviction.initial_backoff.is_zero() {
            anyhow::bail!("eviction.initial_backoff must be > 0");
        }
        if self.eviction.initial_backoff > self.eviction.max_backoff {
            anyhow::bail!("eviction.initial_backoff must not exceed eviction.max_backoff");
        }
        if self.eviction.deletion_check_interval.is_zero() {
            anyhow::bail!("eviction.deletion_check_interval must be > 0");
        }
        if self.eviction.finalization_window.is_zero() {
            anyhow::bail!("eviction.finalization_window must be > 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("metrics.port must be > 0 when metrics are enabled");
        }
        Ok(())
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            error_backoff: self.watcher.error_backoff,
            not_ready_backoff: self.watcher.not_ready_backoff,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            concurrency: self.eviction.concurrency,
            initial_backoff: self.eviction.initial_backoff,
            max_backoff: self.eviction.max_backoff,
            deletion_check_interval: self.eviction.deletion_check_interval,
            finalization_window: self.eviction.finalization_window,
        }
    }
}

// Default value functions
fn default_error_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_not_ready_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_concurrency() -> usize {
    10
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(20)
}

fn default_deletion_check_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_finalization_window() -> Duration {
    Duration::from_secs(10)
}

fn default_metrics_port() -> u16 {
    9110
}

fn default_true() -> bool {
    true
}
