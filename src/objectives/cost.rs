use crate::model::{ClusterSnapshot, GIB};
use crate::objectives::{Normalizer, Objective};

/// Effective cost of an assignment in $/hour: the cost of every request on
/// its node plus the cost of idle capacity on every node that hosts at
/// least one pod. Nodes hosting nothing contribute nothing, so denser
/// packings and cheaper nodes both lower the value.
pub fn effective_cost(snapshot: &ClusterSnapshot, assignment: &[usize]) -> f64 {
    let usage = snapshot.node_usage(assignment);
    let mut total = 0.0;
    for (n, node) in snapshot.nodes.iter().enumerate() {
        let (cpu, mem) = usage[n];
        if cpu == 0 && mem == 0 {
            continue;
        }
        let used = node.request_cost(cpu, mem);
        let idle = node.request_cost((node.cpu_millis - cpu).max(0), (node.mem_bytes - mem).max(0));
        total += used + idle;
    }
    total
}

/// Lower cost bound: first-fit-decreasing onto nodes sorted by unit price.
///
/// Node order is ascending `cost_per_vcpu + cost_per_gib * ratio` with
/// `ratio = avg($/vCPU) / avg($/GiB)`; pods descend by their dollar value
/// at average unit prices. Waste counts active nodes only, matching
/// [`effective_cost`].
fn lower_bound(snapshot: &ClusterSnapshot) -> f64 {
    if snapshot.pods.is_empty() || snapshot.nodes.is_empty() {
        return 0.0;
    }
    let n = snapshot.nodes.len() as f64;
    let avg_cpv: f64 = snapshot.nodes.iter().map(|x| x.cost_per_vcpu).sum::<f64>() / n;
    let avg_cpg: f64 = snapshot.nodes.iter().map(|x| x.cost_per_gib).sum::<f64>() / n;
    let ratio = if avg_cpg > 0.0 { avg_cpv / avg_cpg } else { 1.0 };

    let mut node_order: Vec<usize> = (0..snapshot.nodes.len()).collect();
    node_order.sort_by(|&a, &b| {
        let ka = snapshot.nodes[a].cost_per_vcpu + snapshot.nodes[a].cost_per_gib * ratio;
        let kb = snapshot.nodes[b].cost_per_vcpu + snapshot.nodes[b].cost_per_gib * ratio;
        ka.total_cmp(&kb)
    });

    let mut pod_order: Vec<usize> = (0..snapshot.pods.len()).collect();
    pod_order.sort_by(|&a, &b| {
        let value = |i: usize| {
            let p = &snapshot.pods[i];
            avg_cpv * (p.cpu_millis as f64 / 1000.0) + avg_cpg * (p.mem_bytes as f64 / GIB)
        };
        value(b).total_cmp(&value(a))
    });

    let mut free: Vec<(i64, i64)> = snapshot
        .nodes
        .iter()
        .map(|x| (x.cpu_millis, x.mem_bytes))
        .collect();
    let mut assignment = vec![node_order[0]; snapshot.pods.len()];
    for &p in &pod_order {
        let pod = &snapshot.pods[p];
        let slot = node_order
            .iter()
            .copied()
            .find(|&ni| free[ni].0 >= pod.cpu_millis && free[ni].1 >= pod.mem_bytes);
        // A pod nothing fits stays on the cheapest node; the bound is a
        // target, not a feasibility proof.
        let ni = slot.unwrap_or(node_order[0]);
        free[ni].0 -= pod.cpu_millis;
        free[ni].1 -= pod.mem_bytes;
        assignment[p] = ni;
    }
    effective_cost(snapshot, &assignment)
}

/// Upper cost bound: round-robin over nodes sorted by descending total
/// price, with waste counted on every node whether active or not.
fn upper_bound(snapshot: &ClusterSnapshot) -> f64 {
    if snapshot.nodes.is_empty() {
        return 0.0;
    }
    let mut node_order: Vec<usize> = (0..snapshot.nodes.len()).collect();
    node_order.sort_by(|&a, &b| {
        snapshot.nodes[b]
            .hourly_cost
            .total_cmp(&snapshot.nodes[a].hourly_cost)
    });
    let assignment: Vec<usize> = (0..snapshot.pods.len())
        .map(|i| node_order[i % node_order.len()])
        .collect();

    let usage = snapshot.node_usage(&assignment);
    let mut total = 0.0;
    for (n, node) in snapshot.nodes.iter().enumerate() {
        let (cpu, mem) = usage[n];
        total += node.request_cost(cpu, mem);
        total += node.request_cost((node.cpu_millis - cpu).max(0), (node.mem_bytes - mem).max(0));
    }
    total
}

/// Effective-cost objective with online-refined min/max normalization.
pub struct CostObjective {
    normalizer: Normalizer,
}

impl CostObjective {
    pub fn new(snapshot: &ClusterSnapshot, population_size: usize) -> Self {
        let lower = lower_bound(snapshot);
        let upper = upper_bound(snapshot).max(lower);
        Self {
            normalizer: Normalizer::new(lower, upper, population_size),
        }
    }
}

impl Objective for CostObjective {
    fn name(&self) -> &'static str {
        "cost"
    }

    fn evaluate(&self, assignment: &[usize], snapshot: &ClusterSnapshot) -> f64 {
        self.normalizer.normalize(effective_cost(snapshot, assignment))
    }
}
