//! EKS Managed Node Group updates.

use std::fmt;

use tokio::time::Instant;
use tracing::{info, warn};

use super::gate::{self, GateDecision, Lifecycle};
use super::gateway::ComponentGateway;
use super::types::Outcome;
use super::version::compare_release_versions;
use super::waiter::{Poll, WaitPolicy};
use crate::ami::ReleaseVersionResolver;
use crate::error::{Result, UpdaterError};

/// Managed node group status as reported by EKS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeGroupStatus {
    Active,
    Creating,
    Updating,
    Degraded,
    CreateFailed,
    Deleting,
    DeleteFailed,
    Unknown(String),
}

impl From<&str> for NodeGroupStatus {
    fn from(status: &str) -> Self {
        match status {
            "ACTIVE" => Self::Active,
            "CREATING" => Self::Creating,
            "UPDATING" => Self::Updating,
            "DEGRADED" => Self::Degraded,
            "CREATE_FAILED" => Self::CreateFailed,
            "DELETING" => Self::Deleting,
            "DELETE_FAILED" => Self::DeleteFailed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for NodeGroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Creating => "CREATING",
            Self::Updating => "UPDATING",
            Self::Degraded => "DEGRADED",
            Self::CreateFailed => "CREATE_FAILED",
            Self::Deleting => "DELETING",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::Unknown(other) => other,
        };
        f.write_str(s)
    }
}

impl NodeGroupStatus {
    pub const fn lifecycle(&self) -> Lifecycle {
        match self {
            Self::Active => Lifecycle::Active,
            Self::Creating | Self::Updating => Lifecycle::Updating,
            _ => Lifecycle::Unavailable,
        }
    }

    /// Map onto the waiter's terminal-state predicate.
    pub fn poll_state(&self) -> Poll<()> {
        match self {
            Self::Active => Poll::Ready(()),
            Self::Creating | Self::Updating | Self::Unknown(_) => Poll::Pending(self.to_string()),
            Self::Degraded | Self::CreateFailed | Self::Deleting | Self::DeleteFailed => {
                Poll::Failed(self.to_string())
            }
        }
    }
}

/// Managed node group information.
#[derive(Debug, Clone)]
pub struct NodeGroupInfo {
    pub name: String,
    pub release_version: Option<String>,
    pub status: NodeGroupStatus,
}

impl NodeGroupInfo {
    /// Returns the current release version or "unknown" if not set.
    pub fn current_release(&self) -> &str {
        self.release_version.as_deref().unwrap_or("unknown")
    }
}

/// Bring one node group to the recommended AMI release for `k8s_version`.
///
/// Never returns an error: every failure becomes [`Outcome::Failed`].
pub async fn update_nodegroup(
    gateway: &dyn ComponentGateway,
    resolver: &dyn ReleaseVersionResolver,
    cluster_name: &str,
    k8s_version: &str,
    nodegroup_name: &str,
    policy: &WaitPolicy,
    dry_run: bool,
) -> Outcome {
    run_nodegroup_update(
        gateway,
        resolver,
        cluster_name,
        k8s_version,
        nodegroup_name,
        policy,
        dry_run,
    )
    .await
    .into()
}

async fn run_nodegroup_update(
    gateway: &dyn ComponentGateway,
    resolver: &dyn ReleaseVersionResolver,
    cluster_name: &str,
    k8s_version: &str,
    nodegroup_name: &str,
    policy: &WaitPolicy,
    dry_run: bool,
) -> Result<Outcome> {
    let resource = format!("node group {nodegroup_name}");

    let mut info = describe(gateway, cluster_name, nodegroup_name, &resource).await?;
    let initial_release = info.current_release().to_string();

    let target = resolver.recommended_release_version(k8s_version).await?;
    let mut awaited_in_flight = false;

    loop {
        let current = info.current_release().to_string();
        let relation = compare_release_versions(&target, &current);
        let decision = gate::decide(info.status.lifecycle(), relation);
        info!(
            component = %nodegroup_name,
            status = %info.status,
            current = %current,
            target = %target,
            decision = %decision,
            "Node group gate evaluated"
        );

        match decision {
            GateDecision::SkipUnavailable => {
                warn!(
                    "Node group {} is {} and cannot be updated, skipping",
                    nodegroup_name, info.status
                );
                return Ok(Outcome::Skipped {
                    reason: format!("node group is {}", info.status),
                });
            }
            GateDecision::SkipCurrent if awaited_in_flight => {
                return Ok(Outcome::Updated {
                    from: initial_release,
                    to: current,
                });
            }
            GateDecision::SkipCurrent => {
                return Ok(Outcome::Current { version: current });
            }
            GateDecision::Await if awaited_in_flight => {
                return Err(UpdaterError::UpdateFailed {
                    resource,
                    status: info.status.to_string(),
                });
            }
            GateDecision::Await if dry_run => {
                return Ok(Outcome::Skipped {
                    reason: "update already in progress".to_string(),
                });
            }
            GateDecision::Await => {
                info!(
                    "Node group {} is already {}, waiting for completion",
                    nodegroup_name, info.status
                );
                info = settle(gateway, cluster_name, nodegroup_name, policy, &resource).await?;
                awaited_in_flight = true;

                if info.release_version.as_deref() != Some(target.as_str()) {
                    warn!(
                        component = %nodegroup_name,
                        observed = %info.current_release(),
                        target = %target,
                        "VersionMismatchInFlight: in-flight update settled on a different release version"
                    );
                }
            }
            GateDecision::Trigger if dry_run => {
                return Ok(Outcome::Planned {
                    from: current,
                    to: target,
                });
            }
            GateDecision::Trigger => {
                let update_id = gateway
                    .update_nodegroup_version(cluster_name, nodegroup_name, &target)
                    .await
                    .map_err(|e| UpdaterError::update_call(resource.clone(), e))?;
                info!(
                    component = %nodegroup_name,
                    update_id = %update_id,
                    from = %current,
                    to = %target,
                    "Node group update triggered"
                );

                info!(
                    "Waiting up to {} minutes for node group {}",
                    policy.timeout.as_secs() / 60,
                    nodegroup_name
                );
                settle(gateway, cluster_name, nodegroup_name, policy, &resource).await?;

                verify(gateway, cluster_name, nodegroup_name, &resource, &target).await?;
                return Ok(Outcome::Updated {
                    from: initial_release,
                    to: target,
                });
            }
        }
    }
}

async fn describe(
    gateway: &dyn ComponentGateway,
    cluster_name: &str,
    nodegroup_name: &str,
    resource: &str,
) -> Result<NodeGroupInfo> {
    gateway
        .describe_nodegroup(cluster_name, nodegroup_name)
        .await
        .map_err(|e| UpdaterError::describe(resource, e))?
        .ok_or_else(|| UpdaterError::describe(resource, UpdaterError::NotFound(resource.to_string())))
}

/// Wait for the node group to leave its transitional state.
async fn settle(
    gateway: &dyn ComponentGateway,
    cluster_name: &str,
    nodegroup_name: &str,
    policy: &WaitPolicy,
    resource: &str,
) -> Result<NodeGroupInfo> {
    let started = Instant::now();
    let settled = gateway
        .wait_for_nodegroup(cluster_name, nodegroup_name, policy)
        .await
        .map_err(|e| wait_error(resource, e))?;
    info!(
        component = %nodegroup_name,
        status = %settled.status,
        release_version = %settled.current_release(),
        waited_secs = started.elapsed().as_secs(),
        "Node group wait finished"
    );
    Ok(settled)
}

/// Re-read the node group after the wait and confirm the release version landed.
async fn verify(
    gateway: &dyn ComponentGateway,
    cluster_name: &str,
    nodegroup_name: &str,
    resource: &str,
    target: &str,
) -> Result<()> {
    let observed = describe(gateway, cluster_name, nodegroup_name, resource).await?;
    if observed.release_version.as_deref() != Some(target) {
        return Err(UpdaterError::VerificationMismatch {
            resource: resource.to_string(),
            expected: target.to_string(),
            actual: observed.current_release().to_string(),
        });
    }
    info!(
        component = %observed.name,
        release_version = %target,
        "Node group update verified"
    );
    Ok(())
}

/// Describe errors raised while polling are reported as describe failures.
pub(crate) fn wait_error(resource: &str, err: UpdaterError) -> UpdaterError {
    match err {
        UpdaterError::UpdateTimeout { .. }
        | UpdaterError::UpdateFailed { .. }
        | UpdaterError::DescribeFailed { .. } => err,
        other => UpdaterError::describe(resource, other),
    }
}
