//! Greedy constructive warm start.
//!
//! Builds a diverse first population by placing pods one at a time in a
//! randomized resource-descending order, scoring candidate nodes with the
//! construction-time objectives: cost and balance. Disruption is not a
//! construction objective — a placement built from scratch has no
//! meaningful "moved" set until it is complete.

use rand::Rng;

use crate::model::ClusterSnapshot;

/// Steering weights are drawn per individual from `base ± SPREAD` so the
/// population explores different cost/balance trade-offs.
const WEIGHT_SPREAD: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct GcshSampler {
    /// Inject the live placement as the first individual.
    pub include_current_state: bool,
}

impl Default for GcshSampler {
    fn default() -> Self {
        Self { include_current_state: true }
    }
}

impl GcshSampler {
    pub fn sample<R: Rng>(
        &self,
        snapshot: &ClusterSnapshot,
        population_size: usize,
        rng: &mut R,
    ) -> Vec<Vec<usize>> {
        let mut population = Vec::with_capacity(population_size);
        if self.include_current_state && population_size > 0 {
            population.push(snapshot.current_assignment());
        }
        while population.len() < population_size {
            population.push(construct(snapshot, rng));
        }
        population
    }
}

fn construct<R: Rng>(snapshot: &ClusterSnapshot, rng: &mut R) -> Vec<usize> {
    let node_count = snapshot.nodes.len();
    if node_count == 0 {
        return Vec::new();
    }
    let w_cost = (0.5 + rng.gen_range(-WEIGHT_SPREAD..WEIGHT_SPREAD)).max(0.05);
    let w_balance = (0.5 + rng.gen_range(-WEIGHT_SPREAD..WEIGHT_SPREAD)).max(0.05);

    // Heaviest pods first, jittered so individuals visit in different orders.
    let mut order: Vec<usize> = (0..snapshot.pods.len()).collect();
    let weight: Vec<f64> = snapshot
        .pods
        .iter()
        .map(|p| {
            let size = p.cpu_millis as f64 + p.mem_bytes as f64 / 1_000_000.0;
            size * rng.gen_range(0.8..1.2)
        })
        .collect();
    order.sort_by(|&a, &b| weight[b].total_cmp(&weight[a]));

    let mut used: Vec<(i64, i64)> = vec![(0, 0); node_count];
    let mut genes = vec![0usize; snapshot.pods.len()];
    for &p in &order {
        let pod = &snapshot.pods[p];
        let fits = |n: usize| {
            let node = &snapshot.nodes[n];
            used[n].0 + pod.cpu_millis <= node.cpu_millis
                && used[n].1 + pod.mem_bytes <= node.mem_bytes
        };
        let mut candidates: Vec<usize> = (0..node_count).filter(|&n| fits(n)).collect();
        if candidates.is_empty() {
            // Nothing fits; take the least-loaded node and let the
            // engine's constraint handling demote the individual.
            candidates = vec![least_loaded(snapshot, &used)];
        }

        let cost_scores: Vec<f64> = candidates
            .iter()
            .map(|&n| placement_cost(snapshot, &used, n, pod.cpu_millis, pod.mem_bytes))
            .collect();
        let balance_scores: Vec<f64> = candidates
            .iter()
            .map(|&n| balance_after(snapshot, &used, n, pod.cpu_millis, pod.mem_bytes))
            .collect();
        let cost_max = cost_scores.iter().cloned().fold(f64::EPSILON, f64::max);
        let balance_max = balance_scores.iter().cloned().fold(f64::EPSILON, f64::max);

        let mut best = 0usize;
        let mut best_score = f64::INFINITY;
        for (c, &n) in candidates.iter().enumerate() {
            let score = w_cost * cost_scores[c] / cost_max
                + w_balance * balance_scores[c] / balance_max
                + rng.gen_range(0.0..1e-9); // randomized tie-break
            if score < best_score {
                best_score = score;
                best = n;
            }
        }
        used[best].0 += pod.cpu_millis;
        used[best].1 += pod.mem_bytes;
        genes[p] = best;
    }
    genes
}

/// Marginal effective cost of the placement: activating an empty node
/// costs its full hourly price, a busy node is already paid for, and the
/// request's own price steers toward cheap resources either way.
fn placement_cost(
    snapshot: &ClusterSnapshot,
    used: &[(i64, i64)],
    n: usize,
    cpu: i64,
    mem: i64,
) -> f64 {
    let node = &snapshot.nodes[n];
    let activation = if used[n] == (0, 0) { node.hourly_cost } else { 0.0 };
    activation + node.request_cost(cpu, mem)
}

/// Mean utilization spread across active nodes after a hypothetical
/// placement. Cheap stand-in for the balance objective on partial state.
fn balance_after(
    snapshot: &ClusterSnapshot,
    used: &[(i64, i64)],
    n: usize,
    cpu: i64,
    mem: i64,
) -> f64 {
    let mut pct = Vec::new();
    for (i, node) in snapshot.nodes.iter().enumerate() {
        let (mut u_cpu, mut u_mem) = used[i];
        if i == n {
            u_cpu += cpu;
            u_mem += mem;
        }
        if u_cpu == 0 && u_mem == 0 {
            continue;
        }
        let cpu_pct = if node.cpu_millis > 0 { u_cpu as f64 / node.cpu_millis as f64 } else { 0.0 };
        let mem_pct = if node.mem_bytes > 0 { u_mem as f64 / node.mem_bytes as f64 } else { 0.0 };
        pct.push((cpu_pct + mem_pct) / 2.0);
    }
    if pct.is_empty() {
        return 0.0;
    }
    let mean = pct.iter().sum::<f64>() / pct.len() as f64;
    (pct.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / pct.len() as f64).sqrt()
}

fn least_loaded(snapshot: &ClusterSnapshot, used: &[(i64, i64)]) -> usize {
    (0..snapshot.nodes.len())
        .min_by(|&a, &b| {
            let load = |n: usize| {
                let node = &snapshot.nodes[n];
                let cpu = if node.cpu_millis > 0 {
                    used[n].0 as f64 / node.cpu_millis as f64
                } else {
                    f64::INFINITY
                };
                let mem = if node.mem_bytes > 0 {
                    used[n].1 as f64 / node.mem_bytes as f64
                } else {
                    f64::INFINITY
                };
                cpu + mem
            };
            load(a).total_cmp(&load(b))
        })
        .unwrap_or(0)
}
