//! Remote component gateway: the control-plane operations the updaters need.

use async_trait::async_trait;
use aws_sdk_eks::types::ResolveConflicts;

use super::addon::{AddonInfo, AddonVersionInfo};
use super::nodegroup::NodeGroupInfo;
use super::waiter::{self, WaitPolicy};
use crate::error::{Result, UpdaterError};

/// Describe/update access to clusters, node groups and add-ons.
///
/// Implementations must be safe to share across concurrent add-on workers.
/// The `wait_for_*` methods have polling implementations built on the
/// describe calls; implementations may replace them.
#[async_trait]
pub trait ComponentGateway: Send + Sync {
    /// Kubernetes version of the cluster control plane (e.g. `1.29`).
    async fn cluster_version(&self, cluster_name: &str) -> Result<String>;

    /// Names of every managed node group in the cluster.
    async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>>;

    /// Describe a node group, `None` if it does not exist.
    async fn describe_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<Option<NodeGroupInfo>>;

    /// Start a node group release version update, returning the update id.
    async fn update_nodegroup_version(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
        release_version: &str,
    ) -> Result<String>;

    /// Describe an installed add-on, `None` if it is not installed.
    async fn describe_addon(&self, cluster_name: &str, addon_name: &str)
    -> Result<Option<AddonInfo>>;

    /// Candidate versions of an add-on for a Kubernetes version.
    async fn describe_addon_versions(
        &self,
        addon_name: &str,
        k8s_version: &str,
    ) -> Result<Vec<AddonVersionInfo>>;

    /// Start an add-on version update, returning the update id.
    async fn update_addon(
        &self,
        cluster_name: &str,
        addon_name: &str,
        addon_version: &str,
        resolve_conflicts: ResolveConflicts,
    ) -> Result<String>;

    /// Block until the node group is `ACTIVE` again.
    async fn wait_for_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
        policy: &WaitPolicy,
    ) -> Result<NodeGroupInfo> {
        let resource = &format!("node group {nodegroup_name}");
        waiter::wait_until_terminal(policy, resource, move || async move {
            let info = self
                .describe_nodegroup(cluster_name, nodegroup_name)
                .await?
                .ok_or_else(|| UpdaterError::NotFound(resource.clone()))?;
            Ok::<_, UpdaterError>(info.status.poll_state().map(|()| info))
        })
        .await
    }

    /// Block until the add-on is `ACTIVE` again.
    async fn wait_for_addon(
        &self,
        cluster_name: &str,
        addon_name: &str,
        policy: &WaitPolicy,
    ) -> Result<AddonInfo> {
        let resource = &format!("add-on {addon_name}");
        waiter::wait_until_terminal(policy, resource, move || async move {
            let info = self
                .describe_addon(cluster_name, addon_name)
                .await?
                .ok_or_else(|| UpdaterError::NotFound(resource.clone()))?;
            Ok::<_, UpdaterError>(info.status.poll_state().map(|()| info))
        })
        .await
    }
}
