//! In-memory gateway and resolver with scripted remote state transitions.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_sdk_eks::types::ResolveConflicts;

use super::addon::{AddonInfo, AddonVersionInfo};
use super::gateway::ComponentGateway;
use super::nodegroup::NodeGroupInfo;
use crate::ami::ReleaseVersionResolver;
use crate::error::{Result, UpdaterError};

/// Describe calls an update stays `UPDATING` for before it settles.
const SETTLE_AFTER_POLLS: u32 = 2;

/// Scripted state of one node group or add-on.
#[derive(Debug, Clone)]
pub struct Scripted {
    version: String,
    status: String,
    /// Version and status the running update settles on.
    settles_to: Option<(String, String)>,
    polls_left: u32,
    stuck: bool,
    reject_updates: bool,
    settle_version: Option<String>,
    settle_status: String,
}

pub type FakeNodeGroup = Scripted;
pub type FakeAddon = Scripted;

impl Scripted {
    pub fn active(version: &str) -> Self {
        Self::with_status(version, "ACTIVE")
    }

    pub fn with_status(version: &str, status: impl fmt::Display) -> Self {
        Self {
            version: version.to_string(),
            status: status.to_string(),
            settles_to: None,
            polls_left: 0,
            stuck: false,
            reject_updates: false,
            settle_version: None,
            settle_status: "ACTIVE".to_string(),
        }
    }

    /// Already `UPDATING` towards `to`, started by someone else.
    pub fn in_flight(from: &str, to: &str) -> Self {
        let mut scripted = Self::with_status(from, "UPDATING");
        scripted.settles_to = Some((to.to_string(), "ACTIVE".to_string()));
        scripted.polls_left = SETTLE_AFTER_POLLS;
        scripted
    }

    /// Updates never leave `UPDATING`.
    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// Update calls are refused.
    pub fn rejecting_updates(mut self) -> Self {
        self.reject_updates = true;
        self
    }

    /// Updates settle on `version` instead of the requested one.
    pub fn settling_on(mut self, version: &str) -> Self {
        self.settle_version = Some(version.to_string());
        self
    }

    /// Updates settle in `status` instead of `ACTIVE`.
    pub fn settling_as(mut self, status: &str) -> Self {
        self.settle_status = status.to_string();
        self
    }

    fn start_update(&mut self, requested: &str) {
        let version = self
            .settle_version
            .clone()
            .unwrap_or_else(|| requested.to_string());
        self.status = "UPDATING".to_string();
        self.settles_to = Some((version, self.settle_status.clone()));
        self.polls_left = SETTLE_AFTER_POLLS;
    }

    /// Current snapshot, then advance one poll.
    fn observe(&mut self) -> (String, String) {
        let snapshot = (self.version.clone(), self.status.clone());
        if self.stuck || self.settles_to.is_none() {
            return snapshot;
        }

        self.polls_left = self.polls_left.saturating_sub(1);
        if self.polls_left == 0 {
            if let Some((version, status)) = self.settles_to.take() {
                self.version = version;
                self.status = status;
            }
        }
        snapshot
    }
}

#[derive(Default)]
struct State {
    nodegroups: Vec<(String, Scripted)>,
    addons: HashMap<String, Scripted>,
    addon_versions: HashMap<String, Vec<AddonVersionInfo>>,
    broken_addons: Vec<String>,
    panicking_addons: Vec<String>,
    nodegroup_updates: Vec<(String, String)>,
    addon_updates: Vec<(String, String, ResolveConflicts)>,
    addon_version_queries: Vec<(String, String)>,
}

/// Control plane double implementing [`ComponentGateway`].
pub struct FakeGateway {
    cluster_version: Option<String>,
    state: Mutex<State>,
}

impl FakeGateway {
    pub fn new(cluster_version: &str) -> Self {
        Self {
            cluster_version: Some(cluster_version.to_string()),
            state: Mutex::new(State::default()),
        }
    }

    /// Cluster describe calls fail.
    pub fn without_cluster() -> Self {
        Self {
            cluster_version: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_nodegroup(self, name: &str, nodegroup: FakeNodeGroup) -> Self {
        self.state
            .lock()
            .unwrap()
            .nodegroups
            .push((name.to_string(), nodegroup));
        self
    }

    pub fn with_addon(self, name: &str, addon: FakeAddon) -> Self {
        self.state
            .lock()
            .unwrap()
            .addons
            .insert(name.to_string(), addon);
        self
    }

    pub fn with_addon_versions(self, name: &str, versions: Vec<AddonVersionInfo>) -> Self {
        self.state
            .lock()
            .unwrap()
            .addon_versions
            .insert(name.to_string(), versions);
        self
    }

    /// Describe calls for `name` fail with a non-not-found error.
    pub fn with_broken_addon(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .broken_addons
            .push(name.to_string());
        self
    }

    /// Describe calls for `name` panic, killing the worker.
    pub fn with_panicking_addon(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .panicking_addons
            .push(name.to_string());
        self
    }

    pub fn nodegroup_updates(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().nodegroup_updates.clone()
    }

    pub fn addon_updates(&self) -> Vec<(String, String, ResolveConflicts)> {
        self.state.lock().unwrap().addon_updates.clone()
    }

    pub fn addon_version_queries(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().addon_version_queries.clone()
    }

    /// Update calls of either kind.
    pub fn update_calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.nodegroup_updates.len() + state.addon_updates.len()
    }
}

#[async_trait]
impl ComponentGateway for FakeGateway {
    async fn cluster_version(&self, cluster_name: &str) -> Result<String> {
        self.cluster_version
            .clone()
            .ok_or_else(|| UpdaterError::NotFound(format!("cluster {cluster_name}")))
    }

    async fn list_nodegroups(&self, _cluster_name: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.nodegroups.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn describe_nodegroup(
        &self,
        _cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<Option<NodeGroupInfo>> {
        let mut state = self.state.lock().unwrap();
        let Some((_, nodegroup)) = state
            .nodegroups
            .iter_mut()
            .find(|(name, _)| name == nodegroup_name)
        else {
            return Ok(None);
        };

        let (version, status) = nodegroup.observe();
        Ok(Some(NodeGroupInfo {
            name: nodegroup_name.to_string(),
            release_version: Some(version),
            status: status.as_str().into(),
        }))
    }

    async fn update_nodegroup_version(
        &self,
        _cluster_name: &str,
        nodegroup_name: &str,
        release_version: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state
            .nodegroup_updates
            .push((nodegroup_name.to_string(), release_version.to_string()));

        let (_, nodegroup) = state
            .nodegroups
            .iter_mut()
            .find(|(name, _)| name == nodegroup_name)
            .ok_or_else(|| UpdaterError::NotFound(nodegroup_name.to_string()))?;
        if nodegroup.reject_updates {
            return Err(UpdaterError::aws("eks::testing", "InvalidRequestException"));
        }
        nodegroup.start_update(release_version);
        Ok(format!("ng-update-{}", state.nodegroup_updates.len()))
    }

    async fn describe_addon(&self, _cluster_name: &str, addon_name: &str) -> Result<Option<AddonInfo>> {
        {
            let mut state = self.state.lock().unwrap();
            if state.broken_addons.iter().any(|a| a == addon_name) {
                return Err(UpdaterError::aws("eks::testing", "connection reset"));
            }

            if !state.panicking_addons.iter().any(|a| a == addon_name) {
                return Ok(state.addons.get_mut(addon_name).map(|addon| {
                    let (version, status) = addon.observe();
                    AddonInfo {
                        name: addon_name.to_string(),
                        version,
                        status: status.as_str().into(),
                    }
                }));
            }
        }

        // Outside the lock so other workers keep going.
        panic!("scripted panic describing {addon_name}");
    }

    async fn describe_addon_versions(
        &self,
        addon_name: &str,
        k8s_version: &str,
    ) -> Result<Vec<AddonVersionInfo>> {
        let mut state = self.state.lock().unwrap();
        state
            .addon_version_queries
            .push((addon_name.to_string(), k8s_version.to_string()));
        Ok(state
            .addon_versions
            .get(addon_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_addon(
        &self,
        _cluster_name: &str,
        addon_name: &str,
        addon_version: &str,
        resolve_conflicts: ResolveConflicts,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.addon_updates.push((
            addon_name.to_string(),
            addon_version.to_string(),
            resolve_conflicts,
        ));

        let addon = state
            .addons
            .get_mut(addon_name)
            .ok_or_else(|| UpdaterError::NotFound(addon_name.to_string()))?;
        if addon.reject_updates {
            return Err(UpdaterError::aws("eks::testing", "InvalidParameterException"));
        }
        addon.start_update(addon_version);
        Ok(format!("addon-update-{}", state.addon_updates.len()))
    }
}

/// Resolver returning one fixed release version, or always failing.
pub struct FixedResolver {
    release_version: Option<String>,
    requested: Mutex<Vec<String>>,
}

impl FixedResolver {
    pub fn new(release_version: &str) -> Self {
        Self {
            release_version: Some(release_version.to_string()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            release_version: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseVersionResolver for FixedResolver {
    async fn recommended_release_version(&self, k8s_version: &str) -> Result<String> {
        self.requested.lock().unwrap().push(k8s_version.to_string());
        self.release_version
            .clone()
            .ok_or_else(|| UpdaterError::ParameterLookup {
                name: format!("/aws/service/eks/optimized-ami/{k8s_version}"),
                details: "ParameterNotFound".to_string(),
            })
    }
}

/// Formatted log output of the current thread, captured at info level.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Capture until the returned guard is dropped.
    pub fn start() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    /// Captured lines containing `message`.
    pub fn lines_with(&self, message: &str) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .filter(|line| line.contains(message))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
