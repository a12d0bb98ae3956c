//! eks-auto-updater - keeps EKS managed node groups and add-ons current.
//!
//! One run:
//! - Resolves the cluster's Kubernetes version
//! - Moves managed node groups to the recommended EKS optimized AMI release
//! - Moves add-ons to their default version, concurrently

mod ami;
mod aws;
mod config;
mod eks;
mod error;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use ami::SsmReleaseVersionResolver;
use aws::{AwsClients, TimestampSessionNames};
use config::{Args, BUILD_DATE, COMMIT, Config, LogFormat, VERSION};
use eks::client::EksGateway;
use eks::upgrade::Updater;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    // Initialize logging
    if let Err(e) = init_tracing(&config.log_level, config.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting eks-auto-updater v{} (commit: {}, build: {})",
        VERSION, COMMIT, BUILD_DATE
    );

    if let Err(e) = run(&config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
        LogFormat::Json => fmt().with_env_filter(filter).json().with_target(true).init(),
    }

    Ok(())
}

/// Main application logic.
async fn run(config: &Config) -> Result<()> {
    let session_names = TimestampSessionNames::default();
    let clients =
        AwsClients::new(&config.region, config.role_arn.as_deref(), &session_names).await;

    let identity = clients.verify_identity().await?;
    info!(
        account = %identity.account_id,
        arn = %identity.arn,
        region = %clients.region,
        "AWS credentials verified"
    );

    let gateway = Arc::new(EksGateway::new(clients.eks.clone()));
    let resolver = Arc::new(SsmReleaseVersionResolver::new(
        clients.ssm.clone(),
        config.ami_family,
    ));

    info!(
        cluster = %config.cluster_name,
        nodegroups = %config.nodegroups,
        addons = %config.addons.join(","),
        ami_family = %config.ami_family,
        dry_run = config.dry_run,
        "Starting update run"
    );

    let report = Updater::new(gateway, resolver, config.run_options())
        .run()
        .await?;
    report.log_summary(&config.cluster_name);
    if report.is_empty() {
        warn!(
            cluster = %config.cluster_name,
            "No node groups or add-ons were selected for update"
        );
    }
    report.into_result()?;

    Ok(())
}
