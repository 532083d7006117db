//! Shared types for ktail
//!
//! This crate contains the pod, container and log event snapshots passed between the
//! Kubernetes sources, the controller and the output layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Pod lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl PodPhase {
    /// Whether containers of a pod in this phase may still produce logs
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// A container declared in a pod spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Lifecycle state of one container
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerState {
    Waiting {
        reason: Option<String>,
    },
    Running {
        started_at: Option<DateTime<Utc>>,
    },
    Terminated {
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        exit_code: i32,
    },
}

impl ContainerState {
    /// Short lowercase label ("running", "waiting", "terminated")
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting { .. } => "waiting",
            Self::Running { .. } => "running",
            Self::Terminated { .. } => "terminated",
        }
    }

    /// True if the container is running now or ran at some point in this state
    pub fn has_run(&self) -> bool {
        match self {
            Self::Running { .. } => true,
            Self::Terminated { started_at, .. } => started_at.is_some(),
            Self::Waiting { .. } => false,
        }
    }
}

/// Status entry reported by the cluster for one container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
    pub last_state: Option<ContainerState>,

    /// Runtime id of the current incarnation, e.g. `containerd://1f2e...`
    pub container_id: Option<String>,

    pub restart_count: i32,
}

impl ContainerStatus {
    pub fn new(name: impl Into<String>, state: ContainerState) -> Self {
        Self {
            name: name.into(),
            state,
            last_state: None,
            container_id: None,
            restart_count: 0,
        }
    }

    /// Start time of the current incarnation, if it is running
    pub fn running_since(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            ContainerState::Running { started_at } => *started_at,
            _ => None,
        }
    }
}

/// Snapshot of a pod as delivered by the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub phase: PodPhase,
    pub labels: BTreeMap<String, String>,
    pub init_containers: Vec<ContainerSpec>,
    pub containers: Vec<ContainerSpec>,
    pub init_container_statuses: Vec<ContainerStatus>,
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Init container statuses first, then regular ones
    pub fn all_container_statuses(&self) -> impl Iterator<Item = &ContainerStatus> {
        self.init_container_statuses
            .iter()
            .chain(self.container_statuses.iter())
    }

    /// Init container specs first, then regular ones
    pub fn all_containers(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.init_containers.iter().chain(self.containers.iter())
    }

    /// Find a container spec (init or regular) by name
    pub fn find_container(&self, name: &str) -> Option<&ContainerSpec> {
        self.all_containers().find(|c| c.name == name)
    }

    /// First status entry for the named container
    pub fn status_for(&self, name: &str) -> Option<&ContainerStatus> {
        self.all_container_statuses().find(|s| s.name == name)
    }

    /// `namespace/name`
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Which namespaces to list and watch
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Named(ns) => f.write_str(ns),
        }
    }
}

/// Incremental change notification for one pod
#[derive(Clone, Debug)]
pub enum PodEvent {
    Added(PodInfo),
    Updated(PodInfo),
    Deleted(PodInfo),
}

impl PodEvent {
    pub fn pod(&self) -> &PodInfo {
        match self {
            Self::Added(pod) | Self::Updated(pod) | Self::Deleted(pod) => pod,
        }
    }
}

// ============================================================================
// Tailer Identity
// ============================================================================

/// How a container incarnation is identified in the tailer table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStrategy {
    /// Use the runtime container id, falling back to the name when none is reported yet.
    /// Two restarts without an id are indistinguishable.
    #[default]
    StreamIdentity,
    /// Always use the container name; restarts keep the same tailer
    ContainerName,
}

/// Identity of one tailed container incarnation
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TailerKey {
    pub namespace: String,
    pub pod: String,
    pub incarnation: String,
}

impl TailerKey {
    pub fn new(pod: &PodInfo, container: &ContainerSpec, strategy: KeyStrategy) -> Self {
        let incarnation = match strategy {
            KeyStrategy::StreamIdentity => pod
                .status_for(&container.name)
                .and_then(|s| s.container_id.clone())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| container.name.clone()),
            KeyStrategy::ContainerName => container.name.clone(),
        };

        Self {
            namespace: pod.namespace.clone(),
            pod: pod.name.clone(),
            incarnation,
        }
    }
}

impl fmt::Display for TailerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.incarnation)
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// A single accepted log line
#[derive(Clone, Debug)]
pub struct LogEvent {
    /// Pod snapshot taken when the tailer was created
    pub pod: Arc<PodInfo>,

    /// Container snapshot taken when the tailer was created
    pub container: Arc<ContainerSpec>,

    /// Timestamp reported by the cluster (absent if it could not be parsed)
    pub timestamp: Option<DateTime<Utc>>,

    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_with_status(id: Option<&str>) -> PodInfo {
        let mut pod = PodInfo::new("ns", "web-1");
        pod.containers.push(ContainerSpec::new("app"));
        let mut status = ContainerStatus::new("app", ContainerState::Running { started_at: None });
        status.container_id = id.map(str::to_string);
        pod.container_statuses.push(status);
        pod
    }

    #[test]
    fn test_key_prefers_container_id() {
        let pod = pod_with_status(Some("containerd://abc"));
        let key = TailerKey::new(&pod, &pod.containers[0], KeyStrategy::StreamIdentity);
        assert_eq!(key.to_string(), "ns/web-1/containerd://abc");
    }

    #[test]
    fn test_key_falls_back_to_name() {
        let pod = pod_with_status(None);
        let key = TailerKey::new(&pod, &pod.containers[0], KeyStrategy::StreamIdentity);
        assert_eq!(key.incarnation, "app");

        let pod = pod_with_status(Some(""));
        let key = TailerKey::new(&pod, &pod.containers[0], KeyStrategy::StreamIdentity);
        assert_eq!(key.incarnation, "app");
    }

    #[test]
    fn test_key_by_name_ignores_id() {
        let pod = pod_with_status(Some("containerd://abc"));
        let key = TailerKey::new(&pod, &pod.containers[0], KeyStrategy::ContainerName);
        assert_eq!(key.incarnation, "app");
    }

    #[test]
    fn test_statuses_init_first() {
        let mut pod = pod_with_status(None);
        pod.init_container_statuses.push(ContainerStatus::new(
            "setup",
            ContainerState::Waiting { reason: None },
        ));
        let names: Vec<_> = pod.all_container_statuses().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["setup", "app"]);
    }

    #[test]
    fn test_terminated_without_start_has_not_run() {
        let state = ContainerState::Terminated {
            started_at: None,
            finished_at: None,
            exit_code: 128,
        };
        assert!(!state.has_run());
        assert!(ContainerState::Running { started_at: None }.has_run());
    }
}
