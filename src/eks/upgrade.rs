//! Update orchestration: node groups first, then add-ons in parallel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::addon;
use super::gateway::ComponentGateway;
use super::nodegroup;
use super::types::{ComponentOutcome, Outcome, RunReport};
use super::waiter::WaitPolicy;
use crate::ami::ReleaseVersionResolver;
use crate::config::{NodeGroupSelector, RunOptions};
use crate::error::{Result, UpdaterError};

/// Runs one update pass over a cluster.
pub struct Updater {
    gateway: Arc<dyn ComponentGateway>,
    resolver: Arc<dyn ReleaseVersionResolver>,
    options: RunOptions,
}

impl Updater {
    pub fn new(
        gateway: Arc<dyn ComponentGateway>,
        resolver: Arc<dyn ReleaseVersionResolver>,
        options: RunOptions,
    ) -> Self {
        Self {
            gateway,
            resolver,
            options,
        }
    }

    /// Update node groups, then add-ons.
    ///
    /// Component failures are recorded in the report. An `Err` means the run
    /// could not start (cluster or node group listing unreadable).
    pub async fn run(&self) -> Result<RunReport> {
        let cluster_name = &self.options.cluster_name;

        let k8s_version = self
            .gateway
            .cluster_version(cluster_name)
            .await
            .map_err(|e| UpdaterError::describe(format!("cluster {cluster_name}"), e))?;
        info!(
            cluster = %cluster_name,
            version = %k8s_version,
            dry_run = self.options.dry_run,
            "Cluster version resolved"
        );

        let mut report = RunReport::new();

        if self.options.includes_nodegroups() {
            self.update_nodegroups(&k8s_version, &mut report).await?;
            if report.has_failures() {
                warn!("Node group update failed, add-on updates are not started");
                return Ok(report);
            }
        }

        if self.options.includes_addons() {
            let outcomes = update_addons(
                Arc::clone(&self.gateway),
                cluster_name,
                &self.options.addons,
                &self.options.addon_policy,
                self.options.dry_run,
            )
            .await;
            for outcome in outcomes {
                report.record(outcome);
            }
        }

        Ok(report)
    }

    /// Update the selected node groups one at a time, stopping at the first failure.
    async fn update_nodegroups(&self, k8s_version: &str, report: &mut RunReport) -> Result<()> {
        let cluster_name = &self.options.cluster_name;

        let names = match &self.options.nodegroups {
            NodeGroupSelector::Specific(name) => vec![name.clone()],
            NodeGroupSelector::All => self
                .gateway
                .list_nodegroups(cluster_name)
                .await
                .map_err(|e| {
                    UpdaterError::describe(format!("node groups of cluster {cluster_name}"), e)
                })?,
        };

        if names.is_empty() {
            info!("No managed node groups found in cluster {}", cluster_name);
            return Ok(());
        }
        info!(
            "Updating {} managed node group(s): {}",
            names.len(),
            names.join(", ")
        );

        for name in names {
            let outcome = nodegroup::update_nodegroup(
                self.gateway.as_ref(),
                self.resolver.as_ref(),
                cluster_name,
                k8s_version,
                &name,
                &self.options.nodegroup_policy,
                self.options.dry_run,
            )
            .await;

            let failed = outcome.is_failure();
            report.record(ComponentOutcome::nodegroup(name, outcome));
            if failed {
                break;
            }
        }

        Ok(())
    }
}

/// Update every add-on concurrently, one task per add-on.
///
/// Returns exactly one outcome per requested add-on, in completion order.
/// `addons` must not contain duplicates.
pub async fn update_addons(
    gateway: Arc<dyn ComponentGateway>,
    cluster_name: &str,
    addons: &[String],
    policy: &WaitPolicy,
    dry_run: bool,
) -> Vec<ComponentOutcome> {
    if addons.is_empty() {
        return Vec::new();
    }
    info!("Updating {} add-on(s): {}", addons.len(), addons.join(", "));

    let (tx, mut rx) = mpsc::unbounded_channel();

    for addon_name in addons {
        let tx = tx.clone();
        let gateway = Arc::clone(&gateway);
        let cluster_name = cluster_name.to_string();
        let addon_name = addon_name.clone();
        let policy = policy.clone();

        tokio::spawn(async move {
            let outcome =
                addon::update_addon(gateway.as_ref(), &cluster_name, &addon_name, &policy, dry_run)
                    .await;
            // Only fails once the receiver is gone, and then nobody is listening.
            let _ = tx.send(ComponentOutcome::addon(addon_name, outcome));
        });
    }

    // The channel closes once every worker has reported or died.
    drop(tx);

    let mut outcomes = Vec::with_capacity(addons.len());
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }

    for addon_name in addons {
        if !outcomes.iter().any(|o| &o.name == addon_name) {
            warn!("Add-on worker for {} exited without an outcome", addon_name);
            outcomes.push(ComponentOutcome::addon(
                addon_name.clone(),
                Outcome::Failed(UpdaterError::WorkerAborted(addon_name.clone())),
            ));
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scope;
    use crate::eks::addon::{ADDON_WAIT_TIMEOUT, AddonVersionInfo};
    use crate::eks::testing::{FakeAddon, FakeGateway, FakeNodeGroup, FixedResolver};
    use crate::error::ComponentKind;
    use std::time::Duration;

    const OLD_AMI: &str = "1.29.0-20240110";
    const NEW_AMI: &str = "1.29.0-20240202";

    fn options(nodegroups: NodeGroupSelector, addons: &[&str]) -> RunOptions {
        RunOptions {
            cluster_name: "prod".to_string(),
            nodegroups,
            addons: addons.iter().map(|s| s.to_string()).collect(),
            only: None,
            nodegroup_policy: WaitPolicy::with_timeout(Duration::from_secs(120 * 60)),
            addon_policy: WaitPolicy::with_timeout(ADDON_WAIT_TIMEOUT),
            dry_run: false,
        }
    }

    fn updater(gateway: &Arc<FakeGateway>, options: RunOptions) -> Updater {
        Updater::new(
            gateway.clone(),
            Arc::new(FixedResolver::new(NEW_AMI)),
            options,
        )
    }

    /// Cluster at 1.29 with one stale node group and a mix of add-on states.
    fn mixed_cluster() -> FakeGateway {
        FakeGateway::new("1.29")
            .with_nodegroup("ng-1", FakeNodeGroup::active(OLD_AMI))
            .with_addon("vpc-cni", FakeAddon::active("v1.15.0-eksbuild.2"))
            .with_addon_versions(
                "vpc-cni",
                vec![AddonVersionInfo::new("v1.16.1-eksbuild.1", true)],
            )
            .with_addon("coredns", FakeAddon::active("v1.11.1-eksbuild.4"))
            .with_addon_versions(
                "coredns",
                vec![AddonVersionInfo::new("v1.11.1-eksbuild.4", true)],
            )
            .with_addon("kube-proxy", FakeAddon::active("custom"))
            .with_addon_versions(
                "kube-proxy",
                vec![AddonVersionInfo::new("v1.29.0-eksbuild.1", true)],
            )
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_addon_gets_exactly_one_outcome() {
        let gateway = Arc::new(mixed_cluster());
        let opts = options(
            NodeGroupSelector::All,
            &["vpc-cni", "coredns", "kube-proxy", "aws-ebs-csi-driver"],
        );

        let report = updater(&gateway, opts).run().await.unwrap();

        assert_eq!(report.len(), 5);
        let addon_count = report
            .outcomes()
            .iter()
            .filter(|o| o.kind == ComponentKind::Addon)
            .count();
        assert_eq!(addon_count, 4);
        assert!(matches!(
            report.get(ComponentKind::Addon, "vpc-cni"),
            Some(Outcome::Updated { .. })
        ));
        assert!(matches!(
            report.get(ComponentKind::Addon, "coredns"),
            Some(Outcome::Current { .. })
        ));
        assert!(matches!(
            report.get(ComponentKind::Addon, "aws-ebs-csi-driver"),
            Some(Outcome::Skipped { .. })
        ));

        let joined = report.into_result().unwrap_err();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.failures()[0].name, "kube-proxy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_addon_failures_do_not_stop_siblings() {
        let gateway = Arc::new(
            mixed_cluster()
                .with_addon("kube-proxy", FakeAddon::active("v1.28.0-eksbuild.1").stuck())
                .with_broken_addon("coredns"),
        );
        let opts = options(NodeGroupSelector::All, &["kube-proxy", "coredns", "vpc-cni"]);

        let report = updater(&gateway, opts).run().await.unwrap();

        assert_eq!(report.count("failed"), 2);
        assert!(matches!(
            report.get(ComponentKind::Addon, "vpc-cni"),
            Some(Outcome::Updated { .. })
        ));
        assert!(matches!(
            report.get(ComponentKind::Addon, "kube-proxy"),
            Some(Outcome::Failed(UpdaterError::UpdateTimeout { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_worker_is_reported_as_aborted() {
        let gateway = Arc::new(mixed_cluster().with_panicking_addon("coredns"));
        let opts = options(NodeGroupSelector::All, &["vpc-cni", "coredns"]);

        let report = updater(&gateway, opts).run().await.unwrap();

        assert_eq!(report.len(), 3);
        assert!(matches!(
            report.get(ComponentKind::Addon, "coredns"),
            Some(Outcome::Failed(UpdaterError::WorkerAborted(_)))
        ));
        assert!(matches!(
            report.get(ComponentKind::Addon, "vpc-cni"),
            Some(Outcome::Updated { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodegroup_failure_blocks_addon_updates() {
        let gateway = Arc::new(
            mixed_cluster()
                .with_nodegroup("ng-2", FakeNodeGroup::active(OLD_AMI).rejecting_updates())
                .with_nodegroup("ng-3", FakeNodeGroup::active(OLD_AMI)),
        );
        let opts = options(NodeGroupSelector::All, &["vpc-cni", "coredns"]);

        let report = updater(&gateway, opts).run().await.unwrap();

        assert!(report.has_failures());
        assert!(gateway.addon_updates().is_empty());
        assert!(report.get(ComponentKind::Addon, "vpc-cni").is_none());
        // ng-3 comes after the failing node group and is never touched.
        assert!(report.get(ComponentKind::NodeGroup, "ng-3").is_none());
        assert_eq!(
            gateway.nodegroup_updates(),
            vec![
                ("ng-1".to_string(), NEW_AMI.to_string()),
                ("ng-2".to_string(), NEW_AMI.to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_a_no_op() {
        let gateway = Arc::new(mixed_cluster());
        let opts = options(NodeGroupSelector::All, &["vpc-cni", "coredns"]);

        let first = updater(&gateway, opts.clone()).run().await.unwrap();
        assert_eq!(first.count("updated"), 2);
        let calls_after_first = gateway.update_calls();
        assert_eq!(calls_after_first, 2);

        let second = updater(&gateway, opts).run().await.unwrap();
        assert_eq!(second.count("current"), 3);
        assert_eq!(gateway.update_calls(), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_specific_nodegroup_only() {
        let gateway = Arc::new(
            FakeGateway::new("1.29")
                .with_nodegroup("ng-1", FakeNodeGroup::active(OLD_AMI))
                .with_nodegroup("ng-2", FakeNodeGroup::active(OLD_AMI)),
        );
        let mut opts = options(NodeGroupSelector::Specific("ng-2".to_string()), &[]);
        opts.only = Some(Scope::Nodegroups);

        let report = updater(&gateway, opts).run().await.unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(
            gateway.nodegroup_updates(),
            vec![("ng-2".to_string(), NEW_AMI.to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_addons_scope_skips_nodegroups() {
        let gateway = Arc::new(mixed_cluster());
        let mut opts = options(NodeGroupSelector::All, &["vpc-cni"]);
        opts.only = Some(Scope::Addons);

        let report = updater(&gateway, opts).run().await.unwrap();

        assert_eq!(report.len(), 1);
        assert!(gateway.nodegroup_updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_cluster_aborts_run() {
        let gateway = Arc::new(FakeGateway::without_cluster());
        let opts = options(NodeGroupSelector::All, &["vpc-cni"]);

        let err = updater(&gateway, opts).run().await.unwrap_err();

        assert!(matches!(err, UpdaterError::DescribeFailed { .. }));
        assert_eq!(gateway.update_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_makes_no_update_calls() {
        let gateway = Arc::new(mixed_cluster());
        let mut opts = options(NodeGroupSelector::All, &["vpc-cni", "coredns"]);
        opts.dry_run = true;

        let report = updater(&gateway, opts).run().await.unwrap();

        assert_eq!(report.count("planned"), 2);
        assert_eq!(report.count("current"), 1);
        assert_eq!(gateway.update_calls(), 0);
    }
}
