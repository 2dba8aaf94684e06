use std::collections::{BTreeMap, HashMap};

/// Bytes per GiB, used whenever a memory request is priced.
pub const GIB: f64 = 1_073_741_824.0;

/// Billing lifecycle of a node's underlying instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    OnDemand,
    Spot,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnDemand => write!(f, "on-demand"),
            Self::Spot => write!(f, "spot"),
        }
    }
}

/// A worker node as seen by one rebalance cycle. Read-only once built.
///
/// Per-resource prices are resolved at adaptation time so the objective
/// functions never touch the price book.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub name: String,
    /// Allocatable CPU in millicores.
    pub cpu_millis: i64,
    /// Allocatable memory in bytes.
    pub mem_bytes: i64,
    pub region: String,
    pub instance_type: String,
    pub lifecycle: Lifecycle,
    /// $/vCPU-hour.
    pub cost_per_vcpu: f64,
    /// $/GiB-hour.
    pub cost_per_gib: f64,
    /// $/node-hour for the whole node.
    pub hourly_cost: f64,
}

impl NodeRecord {
    /// Dollar cost per hour of a request placed on this node.
    pub fn request_cost(&self, cpu_millis: i64, mem_bytes: i64) -> f64 {
        self.cost_per_vcpu * (cpu_millis as f64 / 1000.0)
            + self.cost_per_gib * (mem_bytes as f64 / GIB)
    }
}

/// A running pod as seen by one rebalance cycle. Read-only once built.
#[derive(Debug, Clone)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    /// CPU request in millicores.
    pub cpu_millis: i64,
    /// Memory request in bytes.
    pub mem_bytes: i64,
    /// Name of the owning replica set (without namespace).
    pub replica_set: String,
    /// Voluntary-disruption budget of the owning replica set.
    /// Defaults to 1; zero or negative means the set must not be moved.
    pub max_unavailable: i32,
    /// Seconds a replacement takes to become ready. 0 when unknown.
    pub cold_start_seconds: f64,
    /// Index into the snapshot's node list where the pod currently runs.
    pub node_index: usize,
}

impl PodRecord {
    /// `namespace/replica_set`, the grouping key budgets and hints use.
    pub fn rs_key(&self) -> String {
        format!("{}/{}", self.namespace, self.replica_set)
    }
}

/// Pods of one replica set, derived from a snapshot.
#[derive(Debug, Clone)]
pub struct ReplicaSetView {
    pub key: String,
    /// Indices into the snapshot's pod list, ascending.
    pub pod_indices: Vec<usize>,
    pub max_unavailable: i32,
}

impl ReplicaSetView {
    pub fn size(&self) -> usize {
        self.pod_indices.len()
    }

    /// Pod counts per node name under the given assignment.
    pub fn distribution(
        &self,
        snapshot: &ClusterSnapshot,
        assignment: &[usize],
    ) -> BTreeMap<String, u32> {
        let mut dist = BTreeMap::new();
        for &i in &self.pod_indices {
            let node = &snapshot.nodes[assignment[i]];
            *dist.entry(node.name.clone()).or_insert(0) += 1;
        }
        dist
    }

    /// Pod indices whose target differs from their current node, ascending.
    pub fn moved(&self, snapshot: &ClusterSnapshot, assignment: &[usize]) -> Vec<usize> {
        self.pod_indices
            .iter()
            .copied()
            .filter(|&i| assignment[i] != snapshot.pods[i].node_index)
            .collect()
    }
}

/// Immutable view of the cluster taken at the start of a cycle.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeRecord>,
    pub pods: Vec<PodRecord>,
}

impl ClusterSnapshot {
    /// The placement the cluster is actually in right now.
    pub fn current_assignment(&self) -> Vec<usize> {
        self.pods.iter().map(|p| p.node_index).collect()
    }

    pub fn node_index_by_name(&self) -> HashMap<&str, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), i))
            .collect()
    }

    /// Group pods by `namespace/replica_set`, keys sorted.
    pub fn replica_sets(&self) -> BTreeMap<String, ReplicaSetView> {
        let mut sets: BTreeMap<String, ReplicaSetView> = BTreeMap::new();
        for (i, pod) in self.pods.iter().enumerate() {
            let view = sets.entry(pod.rs_key()).or_insert_with(|| ReplicaSetView {
                key: pod.rs_key(),
                pod_indices: Vec::new(),
                max_unavailable: pod.max_unavailable,
            });
            view.pod_indices.push(i);
        }
        sets
    }

    /// Summed (cpu_millis, mem_bytes) requests per node under an assignment.
    pub fn node_usage(&self, assignment: &[usize]) -> Vec<(i64, i64)> {
        let mut usage = vec![(0i64, 0i64); self.nodes.len()];
        for (i, &n) in assignment.iter().enumerate() {
            usage[n].0 += self.pods[i].cpu_millis;
            usage[n].1 += self.pods[i].mem_bytes;
        }
        usage
    }

    /// Total capacity overflow of an assignment, as a sum of per-node
    /// per-resource overflow fractions. 0.0 means feasible.
    pub fn capacity_violation(&self, assignment: &[usize]) -> f64 {
        let mut violation = 0.0;
        for (n, &(cpu, mem)) in self.node_usage(assignment).iter().enumerate() {
            let node = &self.nodes[n];
            if cpu > node.cpu_millis && node.cpu_millis > 0 {
                violation += (cpu - node.cpu_millis) as f64 / node.cpu_millis as f64;
            }
            if mem > node.mem_bytes && node.mem_bytes > 0 {
                violation += (mem - node.mem_bytes) as f64 / node.mem_bytes as f64;
            }
        }
        violation
    }

    pub fn fits(&self, assignment: &[usize]) -> bool {
        self.capacity_violation(assignment) == 0.0
    }

    /// Number of pods whose assignment differs from their current node.
    pub fn movement_count(&self, assignment: &[usize]) -> usize {
        assignment
            .iter()
            .enumerate()
            .filter(|&(i, &n)| n != self.pods[i].node_index)
            .count()
    }
}

/// Classification of a single pod movement for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementKind {
    OnDemandToSpot,
    SpotToOnDemand,
    /// Same lifecycle, different instance type.
    TypeChange,
    SameType,
}

impl MovementKind {
    pub fn classify(from: &NodeRecord, to: &NodeRecord) -> Self {
        match (from.lifecycle, to.lifecycle) {
            (Lifecycle::OnDemand, Lifecycle::Spot) => Self::OnDemandToSpot,
            (Lifecycle::Spot, Lifecycle::OnDemand) => Self::SpotToOnDemand,
            _ if from.instance_type != to.instance_type => Self::TypeChange,
            _ => Self::SameType,
        }
    }
}

/// Movement-type counts for one assignment, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementBreakdown {
    pub on_demand_to_spot: usize,
    pub spot_to_on_demand: usize,
    pub type_change: usize,
    pub same_type: usize,
}

impl MovementBreakdown {
    pub fn of(snapshot: &ClusterSnapshot, assignment: &[usize]) -> Self {
        let mut breakdown = Self::default();
        for (i, &target) in assignment.iter().enumerate() {
            let current = snapshot.pods[i].node_index;
            if target == current {
                continue;
            }
            match MovementKind::classify(&snapshot.nodes[current], &snapshot.nodes[target]) {
                MovementKind::OnDemandToSpot => breakdown.on_demand_to_spot += 1,
                MovementKind::SpotToOnDemand => breakdown.spot_to_on_demand += 1,
                MovementKind::TypeChange => breakdown.type_change += 1,
                MovementKind::SameType => breakdown.same_type += 1,
            }
        }
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, cpu: i64, mem: i64) -> NodeRecord {
        NodeRecord {
            name: name.into(),
            cpu_millis: cpu,
            mem_bytes: mem,
            region: "eu-central-1".into(),
            instance_type: "m5.xlarge".into(),
            lifecycle: Lifecycle::OnDemand,
            cost_per_vcpu: 0.024,
            cost_per_gib: 0.006,
            hourly_cost: 0.192,
        }
    }

    fn pod(ns: &str, name: &str, rs: &str, cpu: i64, mem: i64, node_index: usize) -> PodRecord {
        PodRecord {
            namespace: ns.into(),
            name: name.into(),
            cpu_millis: cpu,
            mem_bytes: mem,
            replica_set: rs.into(),
            max_unavailable: 1,
            cold_start_seconds: 0.0,
            node_index,
        }
    }

    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: vec![node("a", 4000, 8_000_000_000), node("b", 4000, 8_000_000_000)],
            pods: vec![
                pod("default", "web-0", "web", 1000, 2_000_000_000, 0),
                pod("default", "web-1", "web", 1000, 2_000_000_000, 0),
                pod("default", "api-0", "api", 500, 1_000_000_000, 1),
            ],
        }
    }

    #[test]
    fn current_assignment_reads_node_indices() {
        assert_eq!(snapshot().current_assignment(), vec![0, 0, 1]);
    }

    #[test]
    fn replica_sets_group_and_sort() {
        let snap = snapshot();
        let sets = snap.replica_sets();
        let keys: Vec<_> = sets.keys().cloned().collect();
        assert_eq!(keys, vec!["default/api", "default/web"]);
        assert_eq!(sets["default/web"].pod_indices, vec![0, 1]);
        assert_eq!(sets["default/web"].size(), 2);
    }

    #[test]
    fn violation_zero_when_fitting() {
        let snap = snapshot();
        assert_eq!(snap.capacity_violation(&[0, 0, 1]), 0.0);
        assert!(snap.fits(&[0, 1, 1]));
    }

    #[test]
    fn violation_counts_overflow_fraction() {
        let mut snap = snapshot();
        snap.nodes[0].cpu_millis = 1500;
        // Two 1000m pods on a 1500m node: 500m over, one third of capacity.
        let v = snap.capacity_violation(&[0, 0, 1]);
        assert!((v - 500.0 / 1500.0).abs() < 1e-9, "violation {v}");
    }

    #[test]
    fn movement_count_against_current() {
        let snap = snapshot();
        assert_eq!(snap.movement_count(&[0, 0, 1]), 0);
        assert_eq!(snap.movement_count(&[1, 0, 0]), 2);
    }

    #[test]
    fn rs_distribution_by_node_name() {
        let snap = snapshot();
        let sets = snap.replica_sets();
        let dist = sets["default/web"].distribution(&snap, &[0, 1, 1]);
        assert_eq!(dist["a"], 1);
        assert_eq!(dist["b"], 1);
        let moved = sets["default/web"].moved(&snap, &[0, 1, 1]);
        assert_eq!(moved, vec![1]);
    }

    #[test]
    fn movement_classification() {
        let od = node("od", 4000, 8_000_000_000);
        let mut spot = node("spot", 4000, 8_000_000_000);
        spot.lifecycle = Lifecycle::Spot;
        let mut other_type = node("other", 4000, 8_000_000_000);
        other_type.instance_type = "c5.xlarge".into();

        assert_eq!(MovementKind::classify(&od, &spot), MovementKind::OnDemandToSpot);
        assert_eq!(MovementKind::classify(&spot, &od), MovementKind::SpotToOnDemand);
        assert_eq!(MovementKind::classify(&od, &other_type), MovementKind::TypeChange);
        assert_eq!(MovementKind::classify(&od, &od), MovementKind::SameType);
    }
}
