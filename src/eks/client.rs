//! AWS EKS SDK client wrapper implementing [`ComponentGateway`].

use async_trait::async_trait;
use aws_sdk_eks::Client;
use aws_sdk_eks::types::{Compatibility, ResolveConflicts};
use tracing::debug;

use super::addon::{AddonInfo, AddonStatus, AddonVersionInfo};
use super::gateway::ComponentGateway;
use super::nodegroup::{NodeGroupInfo, NodeGroupStatus};
use crate::error::{Result, UpdaterError};

/// EKS control plane access for one region.
#[derive(Clone)]
pub struct EksGateway {
    client: Client,
}

impl EksGateway {
    /// Create a gateway from a pre-configured AWS SDK EKS client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentGateway for EksGateway {
    async fn cluster_version(&self, cluster_name: &str) -> Result<String> {
        debug!("Describing cluster: {}", cluster_name);

        let response = self
            .client
            .describe_cluster()
            .name(cluster_name)
            .send()
            .await
            .map_err(|e| UpdaterError::aws(module_path!(), e))?;

        response
            .cluster()
            .and_then(|c| c.version())
            .map(str::to_string)
            .ok_or_else(|| UpdaterError::NotFound(format!("version of cluster {cluster_name}")))
    }

    async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>> {
        debug!("Listing managed node groups for cluster: {}", cluster_name);

        let mut nodegroups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_nodegroups()
                .cluster_name(cluster_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| UpdaterError::aws(module_path!(), e))?;

            nodegroups.extend(response.nodegroups().iter().cloned());

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!("Found {} managed node groups", nodegroups.len());
        Ok(nodegroups)
    }

    async fn describe_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<Option<NodeGroupInfo>> {
        debug!("Describing managed node group: {}", nodegroup_name);

        let response = match self
            .client
            .describe_nodegroup()
            .cluster_name(cluster_name)
            .nodegroup_name(nodegroup_name)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(UpdaterError::aws(module_path!(), e)),
        };

        Ok(response.nodegroup().map(|ng| NodeGroupInfo {
            name: ng.nodegroup_name().unwrap_or(nodegroup_name).to_string(),
            release_version: ng.release_version().map(str::to_string),
            status: ng
                .status()
                .map(|s| NodeGroupStatus::from(s.as_str()))
                .unwrap_or_else(|| NodeGroupStatus::Unknown("UNKNOWN".to_string())),
        }))
    }

    async fn update_nodegroup_version(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
        release_version: &str,
    ) -> Result<String> {
        debug!(
            "Updating managed node group {} to release version {}",
            nodegroup_name, release_version
        );

        let response = self
            .client
            .update_nodegroup_version()
            .cluster_name(cluster_name)
            .nodegroup_name(nodegroup_name)
            .release_version(release_version)
            .send()
            .await
            .map_err(|e| UpdaterError::aws(module_path!(), e))?;

        Ok(response
            .update()
            .and_then(|u| u.id())
            .map(str::to_string)
            .unwrap_or_default())
    }

    async fn describe_addon(&self, cluster_name: &str, addon_name: &str) -> Result<Option<AddonInfo>> {
        debug!("Describing add-on: {}", addon_name);

        let response = match self
            .client
            .describe_addon()
            .cluster_name(cluster_name)
            .addon_name(addon_name)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(UpdaterError::aws(module_path!(), e)),
        };

        Ok(response.addon().map(|addon| AddonInfo {
            name: addon.addon_name().unwrap_or(addon_name).to_string(),
            version: addon.addon_version().unwrap_or_default().to_string(),
            status: addon
                .status()
                .map(|s| AddonStatus::from(s.as_str()))
                .unwrap_or_else(|| AddonStatus::Unknown("UNKNOWN".to_string())),
        }))
    }

    async fn describe_addon_versions(
        &self,
        addon_name: &str,
        k8s_version: &str,
    ) -> Result<Vec<AddonVersionInfo>> {
        debug!(
            "Getting compatible versions for {} with K8s {}",
            addon_name, k8s_version
        );

        let mut versions = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .describe_addon_versions()
                .addon_name(addon_name)
                .kubernetes_version(k8s_version)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| UpdaterError::aws(module_path!(), e))?;

            for addon in response.addons() {
                for version_info in addon.addon_versions() {
                    versions.push(AddonVersionInfo::new(
                        version_info.addon_version().unwrap_or_default(),
                        version_info
                            .compatibilities()
                            .iter()
                            .any(Compatibility::default_version),
                    ));
                }
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(versions)
    }

    async fn update_addon(
        &self,
        cluster_name: &str,
        addon_name: &str,
        addon_version: &str,
        resolve_conflicts: ResolveConflicts,
    ) -> Result<String> {
        debug!("Updating add-on {} to version {}", addon_name, addon_version);

        let response = self
            .client
            .update_addon()
            .cluster_name(cluster_name)
            .addon_name(addon_name)
            .addon_version(addon_version)
            .resolve_conflicts(resolve_conflicts)
            .send()
            .await
            .map_err(|e| UpdaterError::aws(module_path!(), e))?;

        Ok(response
            .update()
            .and_then(|u| u.id())
            .map(str::to_string)
            .unwrap_or_default())
    }
}
