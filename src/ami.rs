//! Recommended EKS optimized AMI release versions from SSM Parameter Store.

use std::fmt;

use async_trait::async_trait;
use aws_sdk_ssm::Client;
use clap::ValueEnum;
use tracing::debug;

use crate::eks::version::parse_k8s_version;
use crate::error::{Result, UpdaterError};

/// Resolves the release version node groups should run for a Kubernetes version.
#[async_trait]
pub trait ReleaseVersionResolver: Send + Sync {
    async fn recommended_release_version(&self, k8s_version: &str) -> Result<String>;
}

/// EKS optimized AMI family whose recommendation is looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum AmiFamily {
    /// Amazon Linux 2
    #[default]
    Al2,
    /// Amazon Linux 2023 (x86_64, standard)
    Al2023,
}

impl fmt::Display for AmiFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Al2 => f.write_str("al2"),
            Self::Al2023 => f.write_str("al2023"),
        }
    }
}

impl AmiFamily {
    /// Public SSM parameter holding the recommended release version.
    pub fn parameter_name(self, k8s_version: &str) -> Result<String> {
        let (major, minor) = parse_k8s_version(k8s_version)?;
        let name = match self {
            Self::Al2 => format!(
                "/aws/service/eks/optimized-ami/{major}.{minor}/amazon-linux-2/recommended/release_version"
            ),
            Self::Al2023 => format!(
                "/aws/service/eks/optimized-ami/{major}.{minor}/amazon-linux-2023/x86_64/standard/recommended/release_version"
            ),
        };
        Ok(name)
    }
}

/// Reads AWS-managed AMI recommendations with `ssm:GetParameter`.
#[derive(Clone)]
pub struct SsmReleaseVersionResolver {
    client: Client,
    family: AmiFamily,
}

impl SsmReleaseVersionResolver {
    pub fn new(client: Client, family: AmiFamily) -> Self {
        Self { client, family }
    }
}

#[async_trait]
impl ReleaseVersionResolver for SsmReleaseVersionResolver {
    async fn recommended_release_version(&self, k8s_version: &str) -> Result<String> {
        let name = self.family.parameter_name(k8s_version)?;
        debug!("Reading SSM parameter {}", name);

        let response = self
            .client
            .get_parameter()
            .name(&name)
            .send()
            .await
            .map_err(|e| UpdaterError::ParameterLookup {
                name: name.clone(),
                details: UpdaterError::aws(module_path!(), e).to_string(),
            })?;

        let value = response
            .parameter()
            .and_then(|p| p.value())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| UpdaterError::ParameterLookup {
                name: name.clone(),
                details: "parameter has no value".to_string(),
            })?;

        debug!("Recommended {} release version for {}: {}", self.family, k8s_version, value);
        Ok(value.to_string())
    }
}
