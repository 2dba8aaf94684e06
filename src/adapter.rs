//! Translation between orchestrator objects and the internal problem
//! model. Misconfigured clusters fail loudly here: a node without
//! instance-type or region labels, or a pod without a replica-set owner,
//! aborts the cycle rather than guessing.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use futures_util::future::try_join_all;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{ClusterSnapshot, Lifecycle, NodeRecord, PodRecord};
use crate::orchestrator::{is_unschedulable, Orchestrator, OrchestratorError};
use crate::pricing::PriceBook;

const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
const INSTANCE_TYPE_LABEL_LEGACY: &str = "beta.kubernetes.io/instance-type";
const REGION_LABEL: &str = "topology.kubernetes.io/region";
const REGION_LABEL_LEGACY: &str = "failure-domain.beta.kubernetes.io/region";
const LIFECYCLE_LABEL: &str = "node.kubernetes.io/lifecycle";
const KARPENTER_CAPACITY_LABEL: &str = "karpenter.sh/capacity-type";
const EKS_CAPACITY_LABEL: &str = "eks.amazonaws.com/capacityType";

/// Annotation carrying a pod's expected cold-start in seconds.
pub const COLD_START_ANNOTATION: &str = "drift/cold-start-seconds";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("node {node} missing required label {label}")]
    MissingNodeLabel { node: String, label: String },
    #[error("node {node} has no allocatable capacity")]
    MissingNodeCapacity { node: String },
    #[error("pod {namespace}/{name} has no replica-set owner")]
    NoReplicaSetOwner { namespace: String, name: String },
    #[error("unparsable {what} quantity {value:?}")]
    BadQuantity { what: &'static str, value: String },
}

/// A cycle's immutable inputs: the internal model plus the raw pods it
/// was adapted from, index-aligned, for eviction calls later.
pub struct Snapshot {
    pub cluster: ClusterSnapshot,
    pub raw_pods: Vec<Pod>,
}

// ── Quantity parsing ─────────────────────────────────────────────────

/// CPU quantity to millicores: `"2"` cores, `"1500m"`, `"250000000n"`.
pub fn parse_cpu_millis(quantity: &Quantity) -> Result<i64, AdapterError> {
    let s = quantity.0.trim();
    let bad = || AdapterError::BadQuantity { what: "cpu", value: s.to_string() };
    if let Some(millis) = s.strip_suffix('m') {
        return millis.parse::<i64>().map_err(|_| bad());
    }
    if let Some(nanos) = s.strip_suffix('n') {
        let n: i64 = nanos.parse().map_err(|_| bad())?;
        return Ok(n / 1_000_000);
    }
    let cores: f64 = s.parse().map_err(|_| bad())?;
    if !cores.is_finite() || cores < 0.0 {
        return Err(bad());
    }
    Ok((cores * 1000.0).round() as i64)
}

/// Memory quantity to bytes: binary (`Ki`..`Ei`) and decimal (`k`..`E`)
/// suffixes plus plain or exponent notation (`2e9`).
pub fn parse_memory_bytes(quantity: &Quantity) -> Result<i64, AdapterError> {
    let s = quantity.0.trim();
    let bad = || AdapterError::BadQuantity { what: "memory", value: s.to_string() };

    const BINARY: [(&str, i64); 6] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
    ];
    const DECIMAL: [(&str, i64); 6] = [
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    for (suffix, factor) in BINARY {
        if let Some(value) = s.strip_suffix(suffix) {
            let v: f64 = value.parse().map_err(|_| bad())?;
            return Ok((v * factor as f64).round() as i64);
        }
    }
    for (suffix, factor) in DECIMAL {
        if let Some(value) = s.strip_suffix(suffix) {
            // Exponent forms like "12e6" are not suffixed quantities.
            if let Ok(v) = value.parse::<f64>() {
                if !value.is_empty() {
                    return Ok((v * factor as f64).round() as i64);
                }
            }
        }
    }
    let bytes: f64 = s.parse().map_err(|_| bad())?;
    if !bytes.is_finite() || bytes < 0.0 {
        return Err(bad());
    }
    Ok(bytes.round() as i64)
}

// ── Node adaptation ──────────────────────────────────────────────────

fn node_label<'a>(node: &'a Node, keys: &[&str]) -> Option<&'a str> {
    let labels = node.metadata.labels.as_ref()?;
    keys.iter().find_map(|k| labels.get(*k).map(|v| v.as_str()))
}

fn node_lifecycle(node: &Node) -> Lifecycle {
    let spot = node_label(node, &[LIFECYCLE_LABEL, KARPENTER_CAPACITY_LABEL, EKS_CAPACITY_LABEL])
        .map(|v| v.eq_ignore_ascii_case("spot"))
        .unwrap_or(false);
    if spot { Lifecycle::Spot } else { Lifecycle::OnDemand }
}

pub fn adapt_node(node: &Node, prices: &PriceBook) -> Result<NodeRecord, AdapterError> {
    let name = node.metadata.name.clone().unwrap_or_default();
    let instance_type = node_label(node, &[INSTANCE_TYPE_LABEL, INSTANCE_TYPE_LABEL_LEGACY])
        .ok_or_else(|| AdapterError::MissingNodeLabel {
            node: name.clone(),
            label: INSTANCE_TYPE_LABEL.into(),
        })?
        .to_string();
    let region = node_label(node, &[REGION_LABEL, REGION_LABEL_LEGACY])
        .ok_or_else(|| AdapterError::MissingNodeLabel {
            node: name.clone(),
            label: REGION_LABEL.into(),
        })?
        .to_string();
    let lifecycle = node_lifecycle(node);

    let status = node.status.as_ref();
    let resources = status
        .and_then(|s| s.allocatable.as_ref())
        .or_else(|| status.and_then(|s| s.capacity.as_ref()))
        .ok_or_else(|| AdapterError::MissingNodeCapacity { node: name.clone() })?;
    let cpu_millis = resources
        .get("cpu")
        .map(parse_cpu_millis)
        .transpose()?
        .unwrap_or(0);
    let mem_bytes = resources
        .get("memory")
        .map(parse_memory_bytes)
        .transpose()?
        .unwrap_or(0);

    let quote = prices.quote_or_fallback(&region, &instance_type, lifecycle);
    Ok(NodeRecord {
        hourly_cost: quote.hourly_for(cpu_millis, mem_bytes),
        cost_per_vcpu: quote.cost_per_vcpu,
        cost_per_gib: quote.cost_per_gib,
        name,
        cpu_millis,
        mem_bytes,
        region,
        instance_type,
        lifecycle,
    })
}

// ── Pod adaptation ───────────────────────────────────────────────────

fn replica_set_owner(pod: &Pod) -> Option<String> {
    pod.metadata.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| r.kind == "ReplicaSet" || r.kind == "StatefulSet")
            .map(|r| r.name.clone())
    })
}

fn pod_requests(pod: &Pod) -> Result<(i64, i64), AdapterError> {
    let mut cpu = 0;
    let mut mem = 0;
    if let Some(spec) = &pod.spec {
        for container in &spec.containers {
            let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref())
            else {
                continue;
            };
            if let Some(q) = requests.get("cpu") {
                cpu += parse_cpu_millis(q)?;
            }
            if let Some(q) = requests.get("memory") {
                mem += parse_memory_bytes(q)?;
            }
        }
    }
    Ok((cpu, mem))
}

fn cold_start_seconds(pod: &Pod) -> f64 {
    let Some(raw) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(COLD_START_ANNOTATION))
    else {
        return 0.0;
    };
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
            warn!(
                pod = pod.metadata.name.as_deref().unwrap_or_default(),
                value = %raw,
                "ignoring unparsable cold-start annotation"
            );
            0.0
        }
    }
}

pub fn adapt_pod(pod: &Pod, node_index: usize) -> Result<PodRecord, AdapterError> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let replica_set = replica_set_owner(pod).ok_or_else(|| AdapterError::NoReplicaSetOwner {
        namespace: namespace.clone(),
        name: name.clone(),
    })?;
    let (cpu_millis, mem_bytes) = pod_requests(pod)?;
    Ok(PodRecord {
        cold_start_seconds: cold_start_seconds(pod),
        namespace,
        name,
        cpu_millis,
        mem_bytes,
        replica_set,
        // Resolved from disruption budgets after grouping.
        max_unavailable: 1,
        node_index,
    })
}

// ── Disruption budgets ───────────────────────────────────────────────

/// Standard label-selector matching: matchLabels plus In/NotIn/Exists/
/// DoesNotExist expressions. An empty selector matches everything.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let value = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or(&[]);
            let ok = match expr.operator.as_str() {
                "In" => value.map(|v| values.contains(v)).unwrap_or(false),
                "NotIn" => value.map(|v| !values.contains(v)).unwrap_or(true),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !ok {
                return false;
            }
        }
    }
    true
}

/// Resolve a budget's maxUnavailable against a replica-set size.
/// Percentages round up. Absent field defaults to 1.
fn resolve_max_unavailable(budget: &PodDisruptionBudget, rs_size: usize) -> i32 {
    match budget.spec.as_ref().and_then(|s| s.max_unavailable.as_ref()) {
        None => 1,
        Some(IntOrString::Int(v)) => *v,
        Some(IntOrString::String(s)) => {
            let parsed = match s.strip_suffix('%') {
                Some(pct) => pct
                    .parse::<f64>()
                    .ok()
                    .map(|p| ((p / 100.0) * rs_size as f64).ceil() as i32),
                None => s.parse::<i32>().ok(),
            };
            parsed.unwrap_or_else(|| {
                warn!(value = %s, "unparsable maxUnavailable, defaulting to 1");
                1
            })
        }
    }
}

/// The budget governing a pod: first budget in the pod's namespace whose
/// selector matches its labels.
fn governing_budget<'a>(
    budgets: &'a [PodDisruptionBudget],
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Option<&'a PodDisruptionBudget> {
    budgets.iter().find(|b| {
        b.metadata.namespace.as_deref() == Some(namespace)
            && b.spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .map(|sel| selector_matches(sel, labels))
                .unwrap_or(false)
    })
}

// ── Snapshot construction ────────────────────────────────────────────

/// List nodes, their pods and the disruption budgets, and translate the
/// lot into one immutable snapshot. Per-node pod listings run
/// concurrently; everything else is one call each.
pub async fn build_snapshot(
    orchestrator: &Orchestrator,
    prices: &PriceBook,
) -> Result<Snapshot, AdapterError> {
    let nodes = orchestrator
        .list_worker_nodes()
        .await?
        .iter()
        .map(|n| adapt_node(n, prices))
        .collect::<Result<Vec<_>, _>>()?;

    let listings = try_join_all(
        nodes
            .iter()
            .map(|record| orchestrator.list_pods_on_node(&record.name)),
    )
    .await?;
    let mut pods = Vec::new();
    let mut raw_pods = Vec::new();
    for (node_index, listing) in listings.into_iter().enumerate() {
        for raw in listing {
            pods.push(adapt_pod(&raw, node_index)?);
            raw_pods.push(raw);
        }
    }

    let budgets = orchestrator.list_disruption_budgets().await?;
    let mut cluster = ClusterSnapshot { nodes, pods };
    apply_budgets(&mut cluster, &raw_pods, &budgets);

    debug!(
        nodes = cluster.nodes.len(),
        pods = cluster.pods.len(),
        budgets = budgets.len(),
        "snapshot adapted"
    );
    Ok(Snapshot { cluster, raw_pods })
}

fn apply_budgets(cluster: &mut ClusterSnapshot, raw_pods: &[Pod], budgets: &[PodDisruptionBudget]) {
    let empty = BTreeMap::new();
    for rs in cluster.replica_sets().values() {
        let first = rs.pod_indices[0];
        let labels = raw_pods[first].metadata.labels.as_ref().unwrap_or(&empty);
        let namespace = cluster.pods[first].namespace.clone();
        let max_unavailable = governing_budget(budgets, &namespace, labels)
            .map(|b| resolve_max_unavailable(b, rs.size()))
            .unwrap_or(1);
        for &i in &rs.pod_indices {
            cluster.pods[i].max_unavailable = max_unavailable;
        }
    }
}

/// The pre-flight safety gate: skip the whole cycle while any non-system
/// pod is failing to schedule, so the rebalancer never thrashes a
/// cluster that has not settled.
pub async fn count_unschedulable_pods(
    orchestrator: &Orchestrator,
) -> Result<usize, OrchestratorError> {
    Ok(orchestrator
        .list_all_pods()
        .await?
        .iter()
        .filter(|p| is_unschedulable(p))
        .count())
}
