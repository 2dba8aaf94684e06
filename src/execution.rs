//! The execution gate: turn a target assignment into the subset of
//! movements the disruption budgets allow right now, and evict exactly
//! those pods.

use tracing::warn;

use crate::adapter::Snapshot;
use crate::model::ClusterSnapshot;
use crate::orchestrator::Orchestrator;

pub const EVICTION_REASON: &str = "multiobjective rebalance";

/// One pod movement the current cycle may perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOp {
    pub pod_index: usize,
    pub from: usize,
    pub to: usize,
}

/// The immediately feasible subset of a target assignment: per replica
/// set, the first `max_unavailable` moving pods in pod-index order.
/// Sets with a non-positive budget are immovable and contribute nothing.
pub fn feasible_moves(cluster: &ClusterSnapshot, target: &[usize]) -> Vec<MoveOp> {
    let mut moves = Vec::new();
    for rs in cluster.replica_sets().values() {
        if rs.max_unavailable <= 0 {
            continue;
        }
        let moving = rs.moved(cluster, target);
        for &i in moving.iter().take(rs.max_unavailable as usize) {
            moves.push(MoveOp {
                pod_index: i,
                from: cluster.pods[i].node_index,
                to: target[i],
            });
        }
    }
    moves.sort_by_key(|m| m.pod_index);
    moves
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionSummary {
    pub evicted: usize,
    pub skipped: usize,
}

/// Evict the feasible moves, one call per pod. A refused eviction is
/// logged and skipped, never retried within the cycle; a pod missing its
/// UID or name is skipped defensively without an API call.
pub async fn execute_moves(
    orchestrator: &Orchestrator,
    snapshot: &Snapshot,
    moves: &[MoveOp],
) -> EvictionSummary {
    let mut summary = EvictionSummary::default();
    for mv in moves {
        let raw = &snapshot.raw_pods[mv.pod_index];
        if raw.metadata.uid.is_none() || raw.metadata.name.is_none() {
            warn!(pod_index = mv.pod_index, "pod missing metadata, skipping eviction");
            summary.skipped += 1;
            continue;
        }
        match orchestrator.evict(raw, EVICTION_REASON).await {
            Ok(()) => summary.evicted += 1,
            Err(error) => {
                warn!(
                    pod = %snapshot.cluster.pods[mv.pod_index].name,
                    %error,
                    "eviction failed, continuing"
                );
                summary.skipped += 1;
            }
        }
    }
    summary
}
