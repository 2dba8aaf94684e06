use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::ClusterSnapshot;
use crate::pareto::SolutionResult;

/// Hints are named `mo-hints-<fingerprint>`, which makes publication
/// idempotent per cluster shape.
pub const HINT_NAME_PREFIX: &str = "mo-hints-";

/// Label selecting this plugin's hints among other cluster-scoped records.
pub const PLUGIN_LABEL_KEY: &str = "plugin";
pub const PLUGIN_LABEL_VALUE: &str = "multiobjective";

/// Spec of a SchedulingHint — a durable, ranked set of target assignments
/// with per-replica-set slot counters that downstream schedulers claim
/// atomically.
///
/// Assignments are stored by node *name*, never by index: indices are a
/// per-snapshot artifact and do not survive node churn.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(group = "drift", version = "v1alpha1", kind = "SchedulingHint")]
pub struct SchedulingHintSpec {
    /// 16-hex digest of the cluster shape at publication time.
    pub cluster_fingerprint: String,
    /// Sorted node names at publication time.
    pub cluster_nodes: Vec<String>,
    /// For each `namespace/replica_set`, pod count per node when the
    /// hint was published.
    pub original_replica_set_distribution: BTreeMap<String, BTreeMap<String, u32>>,
    /// Ranked solutions; rank 1 is best.
    pub solutions: Vec<RankedSolution>,
    /// RFC 3339 instant after which readers ignore the hint.
    pub expiration_time: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct RankedSolution {
    pub rank: u32,
    pub weighted_score: f64,
    pub objectives: ObjectiveValues,
    pub movement_count: u32,
    /// Movements per `namespace/replica_set`; only sets that change
    /// appear here.
    pub movements: BTreeMap<String, ReplicaSetMovement>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ObjectiveValues {
    pub cost: f64,
    pub disruption: f64,
    pub balance: f64,
}

impl ObjectiveValues {
    /// Engine objective order is `(cost, disruption, balance)`.
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            cost: values.first().copied().unwrap_or_default(),
            disruption: values.get(1).copied().unwrap_or_default(),
            balance: values.get(2).copied().unwrap_or_default(),
        }
    }
}

/// Target placement of one replica set plus the mutable reservation
/// counters consumed by downstream schedulers.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ReplicaSetMovement {
    /// Pod count per node the solution wants.
    pub target_distribution: BTreeMap<String, u32>,
    /// Remaining claimable slots per node: initialized to
    /// `max(0, target - current)`, decremented per reservation.
    pub available_slots: BTreeMap<String, u32>,
    /// Reservations consumed per node.
    pub scheduled_count: BTreeMap<String, u32>,
}

impl SchedulingHint {
    pub fn hint_name(fingerprint: &str) -> String {
        format!("{HINT_NAME_PREFIX}{fingerprint}")
    }

    /// A hint with an unparsable expiration is treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.spec.expiration_time) {
            Ok(expiry) => expiry.with_timezone(&Utc) <= now,
            Err(_) => true,
        }
    }

    /// Synthetic per-replica-set pod counts from the recorded original
    /// distribution, for delta detection.
    pub fn rs_counts(&self) -> BTreeMap<String, usize> {
        self.spec
            .original_replica_set_distribution
            .iter()
            .map(|(rs, dist)| (rs.clone(), dist.values().map(|&c| c as usize).sum()))
            .collect()
    }

    /// The rank-1 solution, if any.
    pub fn top_solution(&self) -> Option<&RankedSolution> {
        self.spec.solutions.iter().min_by_key(|s| s.rank)
    }
}

/// Build the publishable hint for a ranked solution list.
pub fn build_hint(
    snapshot: &ClusterSnapshot,
    fingerprint: &str,
    solutions: &[SolutionResult],
    max_solutions: usize,
    expiration: DateTime<Utc>,
) -> SchedulingHint {
    let sets = snapshot.replica_sets();
    let current = snapshot.current_assignment();

    let original: BTreeMap<String, BTreeMap<String, u32>> = sets
        .values()
        .map(|rs| (rs.key.clone(), rs.distribution(snapshot, &current)))
        .collect();

    let ranked: Vec<RankedSolution> = solutions
        .iter()
        .take(max_solutions)
        .enumerate()
        .map(|(i, solution)| {
            let mut movements = BTreeMap::new();
            for rs in sets.values() {
                let target = rs.distribution(snapshot, &solution.assignment);
                let before = &original[&rs.key];
                if &target == before {
                    continue;
                }
                let mut available_slots = BTreeMap::new();
                let mut scheduled_count = BTreeMap::new();
                for (node, &want) in &target {
                    let have = before.get(node).copied().unwrap_or(0);
                    if want > have {
                        available_slots.insert(node.clone(), want - have);
                        scheduled_count.insert(node.clone(), 0);
                    }
                }
                movements.insert(
                    rs.key.clone(),
                    ReplicaSetMovement { target_distribution: target, available_slots, scheduled_count },
                );
            }
            RankedSolution {
                rank: (i + 1) as u32,
                weighted_score: solution.weighted_score,
                objectives: ObjectiveValues::from_slice(&solution.objectives),
                movement_count: solution.movement_count as u32,
                movements,
            }
        })
        .collect();

    let mut cluster_nodes: Vec<String> = snapshot.nodes.iter().map(|n| n.name.clone()).collect();
    cluster_nodes.sort();

    let mut hint = SchedulingHint::new(
        &SchedulingHint::hint_name(fingerprint),
        SchedulingHintSpec {
            cluster_fingerprint: fingerprint.to_string(),
            cluster_nodes,
            original_replica_set_distribution: original,
            solutions: ranked,
            expiration_time: expiration.to_rfc3339(),
        },
    );
    hint.metadata.labels = Some(BTreeMap::from([(
        PLUGIN_LABEL_KEY.to_string(),
        PLUGIN_LABEL_VALUE.to_string(),
    )]));
    hint
}

/// Rebuild an index-encoded assignment from a published solution against
/// the current snapshot: pods of each moved replica set are dealt onto
/// the target distribution in index order, everything else keeps its
/// current node. Node names unknown to the snapshot are skipped.
pub fn reconstruct_assignment(
    snapshot: &ClusterSnapshot,
    solution: &RankedSolution,
) -> Vec<usize> {
    let by_name = snapshot.node_index_by_name();
    let mut sets = snapshot.replica_sets();
    let mut genes = snapshot.current_assignment();
    for (rs_key, movement) in &solution.movements {
        let Some(rs) = sets.remove(rs_key) else {
            continue;
        };
        let mut targets: Vec<usize> = Vec::with_capacity(rs.size());
        for (node, &count) in &movement.target_distribution {
            if let Some(&index) = by_name.get(node.as_str()) {
                targets.extend(std::iter::repeat_n(index, count as usize));
            }
        }
        for (&pod_index, &node_index) in rs.pod_indices.iter().zip(&targets) {
            genes[pod_index] = node_index;
        }
    }
    genes
}
