//! CLI argument parsing for spotd
//!
//! Every option can also be supplied through the environment, which is how
//! the DaemonSet manifest configures the handler.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use spotd_core::policy::DEFAULT_GRACE_PERIOD_SECONDS;
use spotd_core::{DrainPolicy, DEFAULT_METADATA_URL};

/// Spot termination handler - cordons and drains the node before the instance is reclaimed
#[derive(Debug, Parser)]
#[command(name = "spotd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the optional tuning file
    #[arg(short, long, env = "SPOTD_CONFIG", default_value = "/etc/spotd/config.yaml")]
    pub config: PathBuf,

    /// Name of the pod running this handler; never evicted
    #[arg(long, env = "POD_NAME")]
    pub pod_name: String,

    /// Node to drain
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Delete pods that could not be evicted before the grace period ends
    #[arg(long, env = "FORCE", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub force: bool,

    /// Evict pods that use emptyDir volumes
    #[arg(long, env = "DELETE_EMPTY_DIR", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub delete_empty_dir: bool,

    /// Leave DaemonSet pods in place instead of refusing to drain
    #[arg(long, env = "IGNORE_DAEMONSETS", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub ignore_daemonsets: bool,

    /// Seconds allowed for the whole eviction phase
    #[arg(long, env = "GRACE_PERIOD", default_value_t = DEFAULT_GRACE_PERIOD_SECONDS)]
    pub grace_period: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, env = "LOG_JSON", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub log_json: bool,

    /// Spot instance-action endpoint
    #[arg(long, env = "METADATA_URL", default_value = DEFAULT_METADATA_URL)]
    pub metadata_url: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Drain policy for this run
    pub fn policy(&self) -> DrainPolicy {
        DrainPolicy {
            force: self.force,
            grace_period_seconds: self.grace_period,
            ignore_daemon_sets: self.ignore_daemonsets,
            delete_empty_dir_data: self.delete_empty_dir,
            self_identity: self.pod_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 5] = ["spotd", "--pod-name", "spotd-x7k2p", "--node-name", "n1"];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(REQUIRED.iter().chain(extra).copied())
    }

    #[test]
    fn test_cli_defaults() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.config.to_str().unwrap(), "/etc/spotd/config.yaml");
        assert_eq!(cli.log_level, "info");
        assert!(!cli.log_json);
        assert!(cli.force);
        assert!(cli.delete_empty_dir);
        assert!(cli.ignore_daemonsets);
        assert_eq!(cli.grace_period, 120);
        assert_eq!(cli.metadata_url, DEFAULT_METADATA_URL);
    }

    #[test]
    fn test_policy() {
        let cli = parse(&["--force", "false", "--grace-period", "90"]).unwrap();
        let policy = cli.policy();

        assert!(!policy.force);
        assert_eq!(policy.grace_period_seconds, 90);
        assert!(policy.ignore_daemon_sets);
        assert!(policy.delete_empty_dir_data);
        assert_eq!(policy.self_identity, "spotd-x7k2p");
    }

    #[test]
    fn test_boolish_values() {
        let cli = parse(&["--ignore-daemonsets", "no", "--delete-empty-dir", "OFF", "--log-json", "1"]).unwrap();
        assert!(!cli.ignore_daemonsets);
        assert!(!cli.delete_empty_dir);
        assert!(cli.log_json);
    }

    #[test]
    fn test_invalid_boolish_is_rejected() {
        assert!(parse(&["--force", "maybe"]).is_err());
    }

    #[test]
    fn test_cli_custom_config() {
        let cli = parse(&["-c", "/custom/config.yaml"]).unwrap();
        assert_eq!(cli.config.to_str().unwrap(), "/custom/config.yaml");
    }
}
