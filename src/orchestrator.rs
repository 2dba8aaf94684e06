//! The host orchestrator's capabilities, as the rebalancer consumes
//! them: list worker nodes, list the pods they run, list disruption
//! budgets, and evict. The kube variant talks to a live cluster; the
//! fake replays scripted state and failure behaviors for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, EvictParams, ListParams};
use kube::Client;
use thiserror::Error;
use tracing::info;

const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";
const LEGACY_MASTER_LABEL: &str = "node-role.kubernetes.io/master";
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("eviction of {namespace}/{name} refused: {message}")]
    EvictionRefused {
        namespace: String,
        name: String,
        message: String,
    },
    #[error(transparent)]
    Api(#[from] kube::Error),
}

// ── Shared pod/node predicates ───────────────────────────────────────

/// Control-plane nodes never host rebalanced workloads.
pub fn is_worker_node(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .map(|labels| {
            !labels.contains_key(CONTROL_PLANE_LABEL) && !labels.contains_key(LEGACY_MASTER_LABEL)
        })
        .unwrap_or(true)
}

fn is_daemonset_owned(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.kind == "DaemonSet"))
        .unwrap_or(false)
}

fn is_mirror_pod(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key(MIRROR_POD_ANNOTATION))
        .unwrap_or(false)
}

fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("")
}

/// Pods the rebalancer is allowed to consider: Running, not daemonset
/// owned, not mirror/static, not in kube-system.
pub fn is_movable_workload(pod: &Pod) -> bool {
    phase(pod) == "Running"
        && !is_daemonset_owned(pod)
        && !is_mirror_pod(pod)
        && pod.metadata.namespace.as_deref() != Some("kube-system")
}

/// A pod the scheduler has failed to place: Pending with no node, or an
/// explicit Unschedulable condition. System pods are ignored.
pub fn is_unschedulable(pod: &Pod) -> bool {
    if pod.metadata.namespace.as_deref() == Some("kube-system") {
        return false;
    }
    let pending_unassigned = phase(pod) == "Pending"
        && pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .unwrap_or("")
            .is_empty();
    let marked_unschedulable = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == "PodScheduled"
                    && c.status == "False"
                    && c.reason.as_deref() == Some("Unschedulable")
            })
        })
        .unwrap_or(false);
    pending_unassigned || marked_unschedulable
}

// ── Capability dispatch ──────────────────────────────────────────────

pub enum Orchestrator {
    Kube(KubeOrchestrator),
    Fake(FakeOrchestrator),
}

impl Orchestrator {
    pub async fn list_worker_nodes(&self) -> Result<Vec<Node>, OrchestratorError> {
        match self {
            Self::Kube(o) => o.list_worker_nodes().await,
            Self::Fake(o) => o.list_worker_nodes().await,
        }
    }

    /// Pods on one node, already filtered to movable workloads.
    pub async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, OrchestratorError> {
        match self {
            Self::Kube(o) => o.list_pods_on_node(node).await,
            Self::Fake(o) => o.list_pods_on_node(node).await,
        }
    }

    pub async fn list_disruption_budgets(
        &self,
    ) -> Result<Vec<PodDisruptionBudget>, OrchestratorError> {
        match self {
            Self::Kube(o) => o.list_disruption_budgets().await,
            Self::Fake(o) => o.list_disruption_budgets().await,
        }
    }

    /// Every pod in the cluster, unfiltered. Only the unscheduled-pods
    /// safety gate uses this.
    pub async fn list_all_pods(&self) -> Result<Vec<Pod>, OrchestratorError> {
        match self {
            Self::Kube(o) => o.list_all_pods().await,
            Self::Fake(o) => o.list_all_pods().await,
        }
    }

    /// Best-effort eviction through the host's eviction policy.
    pub async fn evict(&self, pod: &Pod, reason: &str) -> Result<(), OrchestratorError> {
        match self {
            Self::Kube(o) => o.evict(pod, reason).await,
            Self::Fake(o) => o.evict(pod, reason).await,
        }
    }
}

// ── Kubernetes-backed orchestrator ───────────────────────────────────

pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_worker_nodes(&self) -> Result<Vec<Node>, OrchestratorError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&format!("!{CONTROL_PLANE_LABEL}"));
        Ok(nodes
            .list(&lp)
            .await?
            .into_iter()
            .filter(is_worker_node)
            .collect())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, OrchestratorError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default()
            .fields(&format!("spec.nodeName={node},status.phase=Running"));
        Ok(pods
            .list(&lp)
            .await?
            .into_iter()
            .filter(is_movable_workload)
            .collect())
    }

    async fn list_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>, OrchestratorError> {
        let budgets: Api<PodDisruptionBudget> = Api::all(self.client.clone());
        Ok(budgets.list(&ListParams::default()).await?.items)
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>, OrchestratorError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        Ok(pods.list(&ListParams::default()).await?.items)
    }

    async fn evict(&self, pod: &Pod, reason: &str) -> Result<(), OrchestratorError> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.evict(name, &EvictParams::default())
            .await
            .map_err(|e| OrchestratorError::EvictionRefused {
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: e.to_string(),
            })?;
        info!(namespace, pod = name, reason, "evicted");
        Ok(())
    }
}

// ── In-memory fake ───────────────────────────────────────────────────

/// What the next `evict()` call does.
#[derive(Debug, Clone)]
pub enum EvictBehavior {
    Succeed,
    /// The eviction API refuses, e.g. a disruption budget blocks it.
    Refuse(String),
}

/// Logged record of an `evict()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictCall {
    pub namespace: String,
    pub name: String,
    pub reason: String,
}

#[derive(Default)]
struct FakeOrchestratorState {
    nodes: Vec<Node>,
    pods: Vec<Pod>,
    budgets: Vec<PodDisruptionBudget>,
    evict_behaviors: VecDeque<EvictBehavior>,
    evict_calls: Vec<EvictCall>,
}

/// Scripted orchestrator for tests: serves a fixed cluster state and
/// pops queued eviction behaviors, succeeding by default.
#[derive(Clone, Default)]
pub struct FakeOrchestrator {
    state: Arc<Mutex<FakeOrchestratorState>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Builder methods ──────────────────────────────────────────────

    pub fn with_nodes(self, nodes: Vec<Node>) -> Self {
        self.state.lock().unwrap().nodes = nodes;
        self
    }

    pub fn with_pods(self, pods: Vec<Pod>) -> Self {
        self.state.lock().unwrap().pods = pods;
        self
    }

    pub fn with_budgets(self, budgets: Vec<PodDisruptionBudget>) -> Self {
        self.state.lock().unwrap().budgets = budgets;
        self
    }

    pub fn on_next_evict(self, behavior: EvictBehavior) -> Self {
        self.state.lock().unwrap().evict_behaviors.push_back(behavior);
        self
    }

    /// Replace the pod set, e.g. to simulate rescheduling between cycles.
    pub fn set_pods(&self, pods: Vec<Pod>) {
        self.state.lock().unwrap().pods = pods;
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn evict_calls(&self) -> Vec<EvictCall> {
        self.state.lock().unwrap().evict_calls.clone()
    }

    // ── Capability implementation ────────────────────────────────────

    async fn list_worker_nodes(&self) -> Result<Vec<Node>, OrchestratorError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .filter(|n| is_worker_node(n))
            .cloned()
            .collect())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, OrchestratorError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|p| {
                p.spec
                    .as_ref()
                    .and_then(|s| s.node_name.as_deref())
                    == Some(node)
            })
            .filter(|p| is_movable_workload(p))
            .cloned()
            .collect())
    }

    async fn list_disruption_budgets(&self) -> Result<Vec<PodDisruptionBudget>, OrchestratorError> {
        Ok(self.state.lock().unwrap().budgets.clone())
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>, OrchestratorError> {
        Ok(self.state.lock().unwrap().pods.clone())
    }

    async fn evict(&self, pod: &Pod, reason: &str) -> Result<(), OrchestratorError> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.evict_calls.push(EvictCall {
                namespace: namespace.clone(),
                name: name.clone(),
                reason: reason.to_string(),
            });
            state
                .evict_behaviors
                .pop_front()
                .unwrap_or(EvictBehavior::Succeed)
        };
        match behavior {
            EvictBehavior::Succeed => Ok(()),
            EvictBehavior::Refuse(message) => Err(OrchestratorError::EvictionRefused {
                namespace,
                name,
                message,
            }),
        }
    }
}
