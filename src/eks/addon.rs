//! EKS add-on updates.

use std::fmt;
use std::time::Duration;

use aws_sdk_eks::types::ResolveConflicts;
use semver::Version;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::gate::{self, GateDecision, Lifecycle};
use super::gateway::ComponentGateway;
use super::nodegroup::wait_error;
use super::types::Outcome;
use super::version::{compare_versions, parse_version};
use super::waiter::{Poll, WaitPolicy};
use crate::error::{Result, UpdaterError};

/// Fixed deadline for an add-on to return to `ACTIVE`.
pub const ADDON_WAIT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Add-on status as reported by EKS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddonStatus {
    Active,
    Creating,
    Updating,
    Deleting,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
    Degraded,
    Unknown(String),
}

impl From<&str> for AddonStatus {
    fn from(status: &str) -> Self {
        match status {
            "ACTIVE" => Self::Active,
            "CREATING" => Self::Creating,
            "UPDATING" => Self::Updating,
            "DELETING" => Self::Deleting,
            "CREATE_FAILED" => Self::CreateFailed,
            "UPDATE_FAILED" => Self::UpdateFailed,
            "DELETE_FAILED" => Self::DeleteFailed,
            "DEGRADED" => Self::Degraded,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Creating => "CREATING",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::CreateFailed => "CREATE_FAILED",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::Degraded => "DEGRADED",
            Self::Unknown(other) => other,
        };
        f.write_str(s)
    }
}

impl AddonStatus {
    pub const fn lifecycle(&self) -> Lifecycle {
        match self {
            Self::Active => Lifecycle::Active,
            Self::Creating | Self::Updating => Lifecycle::Updating,
            _ => Lifecycle::Unavailable,
        }
    }

    pub fn poll_state(&self) -> Poll<()> {
        match self {
            Self::Active => Poll::Ready(()),
            Self::Creating | Self::Updating | Self::Unknown(_) => Poll::Pending(self.to_string()),
            Self::Deleting
            | Self::CreateFailed
            | Self::UpdateFailed
            | Self::DeleteFailed
            | Self::Degraded => Poll::Failed(self.to_string()),
        }
    }
}

/// Installed add-on information.
#[derive(Debug, Clone)]
pub struct AddonInfo {
    pub name: String,
    pub version: String,
    pub status: AddonStatus,
}

/// One candidate version from `DescribeAddonVersions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonVersionInfo {
    pub version: String,
    /// Flagged as the default version for the requested Kubernetes version.
    pub default_version: bool,
}

impl AddonVersionInfo {
    pub fn new(version: impl Into<String>, default_version: bool) -> Self {
        Self {
            version: version.into(),
            default_version,
        }
    }
}

/// Pick the default version among `candidates`.
///
/// When several are flagged, the highest parseable one wins. Flagged versions
/// that do not parse are ignored unless none parses. Never falls back to an
/// unflagged version.
pub fn select_default_version(
    addon_name: &str,
    k8s_version: &str,
    candidates: &[AddonVersionInfo],
) -> Result<String> {
    let mut selected: Option<(&str, Version)> = None;
    let mut first_unparseable: Option<&str> = None;

    for candidate in candidates.iter().filter(|c| c.default_version) {
        let parsed = match parse_version(&candidate.version) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    "Ignoring unparseable default version {} of add-on {}",
                    candidate.version, addon_name
                );
                first_unparseable.get_or_insert(candidate.version.as_str());
                continue;
            }
        };

        if selected.as_ref().is_none_or(|(_, best)| parsed > *best) {
            selected = Some((candidate.version.as_str(), parsed));
        }
    }

    match (selected, first_unparseable) {
        (Some((version, _)), _) => Ok(version.to_string()),
        (None, Some(version)) => Err(UpdaterError::InvalidVersionFormat(version.to_string())),
        (None, None) => Err(UpdaterError::NoDefaultVersion {
            addon: addon_name.to_string(),
            k8s_version: k8s_version.to_string(),
        }),
    }
}

async fn settle(
    gateway: &dyn ComponentGateway,
    cluster_name: &str,
    addon_name: &str,
    policy: &WaitPolicy,
    resource: &str,
) -> Result<AddonInfo> {
    let started = Instant::now();
    let settled = gateway
        .wait_for_addon(cluster_name, addon_name, policy)
        .await
        .map_err(|e| wait_error(resource, e))?;
    info!(
        component = %addon_name,
        status = %settled.status,
        version = %settled.version,
        waited_secs = started.elapsed().as_secs(),
        "Add-on wait finished"
    );
    Ok(settled)
}

/// Bring one add-on to the default version for the cluster's Kubernetes version.
///
/// Never returns an error: every failure becomes [`Outcome::Failed`].
pub async fn update_addon(
    gateway: &dyn ComponentGateway,
    cluster_name: &str,
    addon_name: &str,
    policy: &WaitPolicy,
    dry_run: bool,
) -> Outcome {
    run_addon_update(gateway, cluster_name, addon_name, policy, dry_run)
        .await
        .into()
}

async fn run_addon_update(
    gateway: &dyn ComponentGateway,
    cluster_name: &str,
    addon_name: &str,
    policy: &WaitPolicy,
    dry_run: bool,
) -> Result<Outcome> {
    let resource = format!("add-on {addon_name}");

    let Some(mut info) = gateway
        .describe_addon(cluster_name, addon_name)
        .await
        .map_err(|e| UpdaterError::describe(&resource, e))?
    else {
        warn!(
            "Add-on {} is not installed in cluster {}, skipping",
            addon_name, cluster_name
        );
        return Ok(Outcome::Skipped {
            reason: "not installed".to_string(),
        });
    };
    let initial_version = info.version.clone();

    let k8s_version = gateway
        .cluster_version(cluster_name)
        .await
        .map_err(|e| UpdaterError::describe(format!("cluster {cluster_name}"), e))?;

    let candidates = gateway
        .describe_addon_versions(addon_name, &k8s_version)
        .await
        .map_err(|e| UpdaterError::describe(format!("{resource} versions"), e))?;
    debug!(
        "Found {} candidate versions of {} for Kubernetes {}",
        candidates.len(),
        addon_name,
        k8s_version
    );

    let target = match select_default_version(addon_name, &k8s_version, &candidates) {
        Ok(target) => target,
        Err(err @ UpdaterError::NoDefaultVersion { .. }) => {
            warn!("{}, skipping", err);
            return Ok(Outcome::Skipped {
                reason: "no default version".to_string(),
            });
        }
        Err(err) => return Err(err),
    };

    let mut awaited_in_flight = false;

    loop {
        let relation = compare_versions(&target, &info.version)?;
        let decision = gate::decide(info.status.lifecycle(), relation);
        info!(
            component = %addon_name,
            status = %info.status,
            current = %info.version,
            target = %target,
            decision = %decision,
            "Add-on gate evaluated"
        );

        match decision {
            GateDecision::SkipUnavailable => {
                warn!(
                    "Add-on {} is {} and cannot be updated, skipping",
                    addon_name, info.status
                );
                return Ok(Outcome::Skipped {
                    reason: format!("add-on is {}", info.status),
                });
            }
            GateDecision::SkipCurrent if awaited_in_flight => {
                return Ok(Outcome::Updated {
                    from: initial_version,
                    to: info.version,
                });
            }
            GateDecision::SkipCurrent => {
                return Ok(Outcome::Current {
                    version: info.version,
                });
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
                    "Add-on {} is already {}, waiting for completion",
                    addon_name, info.status
                );
                info = settle(gateway, cluster_name, addon_name, policy, &resource).await?;
                awaited_in_flight = true;

                if info.version != target {
                    warn!(
                        component = %addon_name,
                        observed = %info.version,
                        target = %target,
                        "VersionMismatchInFlight: in-flight update settled on a different version"
                    );
                }
            }
            GateDecision::Trigger if dry_run => {
                return Ok(Outcome::Planned {
                    from: info.version,
                    to: target,
                });
            }
            GateDecision::Trigger => {
                let update_id = gateway
                    .update_addon(
                        cluster_name,
                        addon_name,
                        &target,
                        ResolveConflicts::Overwrite,
                    )
                    .await
                    .map_err(|e| UpdaterError::update_call(resource.clone(), e))?;
                info!(
                    component = %addon_name,
                    update_id = %update_id,
                    from = %info.version,
                    to = %target,
                    resolve_conflicts = "OVERWRITE",
                    "Add-on update triggered"
                );

                info!(
                    "Waiting up to {} minutes for add-on {}",
                    policy.timeout.as_secs() / 60,
                    addon_name
                );
                let settled = settle(gateway, cluster_name, addon_name, policy, &resource).await?;
                if settled.version != target {
                    return Err(UpdaterError::VerificationMismatch {
                        resource,
                        expected: target,
                        actual: settled.version,
                    });
                }

                info!(component = %settled.name, version = %target, "Add-on update verified");
                return Ok(Outcome::Updated {
                    from: initial_version,
                    to: target,
                });
            }
        }
    }
}
