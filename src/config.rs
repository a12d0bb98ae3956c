//! CLI configuration and argument parsing.

use std::fmt;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::ami::AmiFamily;
use crate::eks::addon::ADDON_WAIT_TIMEOUT;
use crate::eks::waiter::WaitPolicy;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Upper bound for `--nodegroup-wait-time`: one week, in minutes.
pub const MAX_NODEGROUP_WAIT_MINUTES: u64 = 7 * 24 * 60;

/// Upper bound for `--poll-interval`: one hour, in seconds.
pub const MAX_POLL_INTERVAL_SECS: u64 = 60 * 60;

/// Add-ons updated when `--addons` is not given.
pub const DEFAULT_ADDONS: &str = "kube-proxy,coredns,vpc-cni,aws-ebs-csi-driver";

/// Updates EKS managed node groups and add-ons to their latest compatible versions.
///
/// Node groups are moved to the recommended EKS optimized AMI release for the
/// cluster's Kubernetes version, one at a time. Add-ons are then moved to their
/// default version concurrently. Repeated runs are safe: components that are
/// already current are skipped.
#[derive(Parser, Debug, Clone)]
#[command(name = "eks-auto-updater")]
#[command(about = "Update EKS managed node groups and add-ons")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// EKS cluster name
    #[arg(short, long, env = "EKS_CLUSTER_NAME")]
    pub cluster_name: String,

    /// AWS region
    #[arg(short, long, env = "AWS_REGION", default_value = "us-west-2")]
    pub region: String,

    /// IAM role to assume before any API call (cross-account access)
    #[arg(long, env = "EKS_AUTO_UPDATER_ROLE_ARN")]
    pub role_arn: Option<String>,

    /// Managed node group to update (default: every node group of the cluster)
    #[arg(short, long)]
    pub nodegroup_name: Option<String>,

    /// Minutes to wait for each node group update
    #[arg(
        long,
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..=MAX_NODEGROUP_WAIT_MINUTES)
    )]
    pub nodegroup_wait_time: u64,

    /// Comma separated add-ons to update
    #[arg(long, alias = "addons-to-update", default_value = DEFAULT_ADDONS)]
    pub addons: String,

    /// Only run one phase
    #[arg(long, value_enum)]
    pub only: Option<Scope>,

    /// EKS optimized AMI family used to resolve node group release versions
    #[arg(long, value_enum, default_value_t = AmiFamily::Al2)]
    pub ami_family: AmiFamily,

    /// Seconds before the first status poll while waiting
    #[arg(
        long,
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=MAX_POLL_INTERVAL_SECS)
    )]
    pub poll_interval: u64,

    /// Evaluate and log what would be updated without updating anything
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "EKS_AUTO_UPDATER_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Phase restriction for `--only`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    Nodegroups,
    Addons,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Which node groups a run updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeGroupSelector {
    All,
    Specific(String),
}

impl From<Option<String>> for NodeGroupSelector {
    fn from(name: Option<String>) -> Self {
        match name.map(|n| n.trim().to_string()) {
            Some(name) if !name.is_empty() => Self::Specific(name),
            _ => Self::All,
        }
    }
}

impl fmt::Display for NodeGroupSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Specific(name) => f.write_str(name),
        }
    }
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_name: String,
    pub region: String,
    pub role_arn: Option<String>,
    pub nodegroups: NodeGroupSelector,
    pub nodegroup_wait_time: Duration,
    pub addons: Vec<String>,
    pub only: Option<Scope>,
    pub ami_family: AmiFamily,
    pub poll_interval: Duration,
    pub dry_run: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        Self {
            cluster_name: args.cluster_name,
            region: args.region,
            role_arn: args.role_arn.filter(|arn| !arn.trim().is_empty()),
            nodegroups: args.nodegroup_name.into(),
            nodegroup_wait_time: Duration::from_secs(args.nodegroup_wait_time.saturating_mul(60)),
            addons: parse_addon_list(&args.addons),
            only: args.only,
            ami_family: args.ami_family,
            poll_interval: Duration::from_secs(args.poll_interval.max(1)),
            dry_run: args.dry_run,
            log_level: args.log_level,
            log_format: args.log_format,
        }
    }

    /// Options handed to the update engine.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            cluster_name: self.cluster_name.clone(),
            nodegroups: self.nodegroups.clone(),
            addons: self.addons.clone(),
            only: self.only,
            nodegroup_policy: WaitPolicy::with_timeout(self.nodegroup_wait_time)
                .with_interval(self.poll_interval),
            addon_policy: WaitPolicy::with_timeout(ADDON_WAIT_TIMEOUT)
                .with_interval(self.poll_interval),
            dry_run: self.dry_run,
        }
    }
}

/// Split a comma separated add-on list, dropping blanks and repeats.
pub fn parse_addon_list(raw: &str) -> Vec<String> {
    let mut addons: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !addons.iter().any(|a| a == name) {
            addons.push(name.to_string());
        }
    }
    addons
}

/// What one run of the update engine does.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cluster_name: String,
    pub nodegroups: NodeGroupSelector,
    pub addons: Vec<String>,
    pub only: Option<Scope>,
    pub nodegroup_policy: WaitPolicy,
    pub addon_policy: WaitPolicy,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn includes_nodegroups(&self) -> bool {
        self.only != Some(Scope::Addons)
    }

    pub fn includes_addons(&self) -> bool {
        self.only != Some(Scope::Nodegroups)
    }
}
