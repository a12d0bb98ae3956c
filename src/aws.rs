//! Region-based AWS client factory with cross-account `AssumeRole` support.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use aws_sdk_eks::Client as EksClient;
use aws_sdk_ssm::Client as SsmClient;
use aws_sdk_sts::Client as StsClient;
use tracing::{debug, info};

use crate::error::{Result, UpdaterError};

/// Lifetime of assumed-role sessions.
pub const ROLE_SESSION_LENGTH: Duration = Duration::from_secs(60 * 60);

/// STS caps role session names at 64 characters.
const MAX_SESSION_NAME_LEN: usize = 64;

/// Produces role session names, unique per call.
pub trait SessionNameSource: Send + Sync {
    fn next_session_name(&self) -> String;
}

/// `<prefix>-<unix seconds>-<counter>` session names.
#[derive(Debug)]
pub struct TimestampSessionNames {
    prefix: String,
    counter: AtomicU64,
}

impl TimestampSessionNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for TimestampSessionNames {
    fn default() -> Self {
        Self::new("eks-auto-updater")
    }
}

impl SessionNameSource for TimestampSessionNames {
    fn next_session_name(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix = format!("-{}-{}", chrono::Utc::now().timestamp(), seq);

        let keep = MAX_SESSION_NAME_LEN.saturating_sub(suffix.len());
        let prefix: String = self.prefix.chars().take(keep).collect();
        format!("{prefix}{suffix}")
    }
}

/// Identity the loaded credentials resolve to.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

/// AWS clients for a specific region.
#[derive(Clone)]
pub struct AwsClients {
    pub eks: EksClient,
    pub ssm: SsmClient,
    pub sts: StsClient,
    pub region: String,
}

impl AwsClients {
    /// Create AWS clients for a given region.
    ///
    /// Uses the default credential chain. If `role_arn` is provided, every
    /// client uses credentials from STS `AssumeRole` on that role instead.
    pub async fn new(
        region: &str,
        role_arn: Option<&str>,
        session_names: &dyn SessionNameSource,
    ) -> Self {
        let config = if let Some(role_arn) = role_arn {
            Self::build_assumed_role_config(region, role_arn, session_names).await
        } else {
            debug!("Creating AWS clients for region: {}", region);
            Self::base_config(region).await
        };

        Self {
            eks: EksClient::new(&config),
            ssm: SsmClient::new(&config),
            sts: StsClient::new(&config),
            region: region.to_string(),
        }
    }

    /// Verify credentials by calling STS `GetCallerIdentity`.
    pub async fn verify_identity(&self) -> Result<CallerIdentity> {
        let resp = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| {
                UpdaterError::Credential(format!(
                    "STS GetCallerIdentity failed: {}",
                    UpdaterError::aws(module_path!(), e)
                ))
            })?;

        Ok(CallerIdentity {
            account_id: resp.account().unwrap_or("unknown").to_string(),
            arn: resp.arn().unwrap_or("unknown").to_string(),
        })
    }

    async fn base_config(region: &str) -> aws_config::SdkConfig {
        aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await
    }

    /// Build AWS config by assuming an IAM role.
    ///
    /// `AssumeRoleProvider` refreshes the temporary credentials before they
    /// expire. Base credentials come from the default chain.
    async fn build_assumed_role_config(
        region: &str,
        role_arn: &str,
        session_names: &dyn SessionNameSource,
    ) -> aws_config::SdkConfig {
        let session_name = session_names.next_session_name();
        info!(
            "Assuming role {} in region {} (session {})",
            role_arn, region, session_name
        );

        let base_config = Self::base_config(region).await;

        let assume_role_provider = aws_config::sts::AssumeRoleProvider::builder(role_arn)
            .configure(&base_config)
            .region(aws_config::Region::new(region.to_string()))
            .session_name(session_name)
            .session_length(ROLE_SESSION_LENGTH)
            .build()
            .await;

        debug!(
            "Configured AssumeRoleProvider for {}, credentials will be resolved on first API call",
            role_arn
        );

        aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .credentials_provider(assume_role_provider)
            .load()
            .await
    }
}
