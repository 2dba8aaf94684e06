use std::str::FromStr;

use crate::model::{ClusterSnapshot, ReplicaSetView};
use crate::objectives::Objective;

/// Reference cold-start used to normalize the cold-start term: a pod that
/// needs a full minute to become ready scores 1.0.
pub const COLD_START_BASELINE_SECS: f64 = 60.0;

/// Shape applied to each replica set's moved fraction before the
/// size-weighted average. All variants map `[0, 1]` onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementPenalty {
    Linear,
    /// Concave: penalizes the first moved pods hardest.
    Sqrt,
    /// `ln(1 + x) / ln 2`, gentler than sqrt near zero.
    Log,
    /// `(1 - e^(-λx)) / (1 - e^(-λ))`.
    Exp(f64),
    /// Free below the cutoff, linear ramp above it.
    Threshold(f64),
}

impl MovementPenalty {
    pub fn apply(&self, moved_fraction: f64) -> f64 {
        let x = moved_fraction.clamp(0.0, 1.0);
        match *self {
            Self::Linear => x,
            Self::Sqrt => x.sqrt(),
            Self::Log => (1.0 + x).ln() / 2f64.ln(),
            Self::Exp(lambda) => {
                let lambda = if lambda.abs() < 1e-9 { 1.0 } else { lambda };
                (1.0 - (-lambda * x).exp()) / (1.0 - (-lambda).exp())
            }
            Self::Threshold(cutoff) => {
                let cutoff = cutoff.clamp(0.0, 1.0);
                if x <= cutoff || cutoff >= 1.0 {
                    0.0
                } else {
                    (x - cutoff) / (1.0 - cutoff)
                }
            }
        }
    }
}

impl FromStr for MovementPenalty {
    type Err = String;

    /// `linear`, `sqrt`, `log`, `exp:<lambda>` or `threshold:<cutoff>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((k, a)) => (k, Some(a)),
            None => (s, None),
        };
        let parse_arg = |a: Option<&str>, what: &str| {
            a.ok_or_else(|| format!("{what} penalty needs an argument, e.g. {what}:0.5"))?
                .parse::<f64>()
                .map_err(|e| format!("bad {what} argument: {e}"))
        };
        match kind {
            "linear" => Ok(Self::Linear),
            "sqrt" => Ok(Self::Sqrt),
            "log" => Ok(Self::Log),
            "exp" => Ok(Self::Exp(parse_arg(arg, "exp")?)),
            "threshold" => Ok(Self::Threshold(parse_arg(arg, "threshold")?)),
            other => Err(format!("unknown movement penalty {other:?}")),
        }
    }
}

/// Relative weight of the three disruption terms.
#[derive(Debug, Clone, Copy)]
pub struct DisruptionWeights {
    pub movement: f64,
    pub cold_start: f64,
    pub time_slots: f64,
}

impl Default for DisruptionWeights {
    fn default() -> Self {
        Self { movement: 0.70, cold_start: 0.10, time_slots: 0.20 }
    }
}

/// Disruption an assignment causes relative to the snapshot's placement:
/// a replica-set-weighted movement term, a cold-start term, and an
/// eviction-time-slot term, each in `[0, 1]`.
pub struct DisruptionObjective {
    weights: DisruptionWeights,
    penalty: MovementPenalty,
    /// Replica-set views frozen at construction.
    sets: Vec<ReplicaSetView>,
    /// Size-weighted average of each set's worst-case slot count, the
    /// divisor for the time-slot term.
    slot_baseline: f64,
}

/// Slots a replica set needs to move `moved` pods under its budget.
/// An immovable set is charged one slot per pod.
fn slots_needed(moved: usize, max_unavailable: i32) -> usize {
    if moved == 0 {
        0
    } else if max_unavailable <= 0 {
        moved
    } else {
        moved.div_ceil(max_unavailable as usize)
    }
}

impl DisruptionObjective {
    pub fn new(
        snapshot: &ClusterSnapshot,
        weights: DisruptionWeights,
        penalty: MovementPenalty,
    ) -> Self {
        let sets: Vec<ReplicaSetView> = snapshot.replica_sets().into_values().collect();
        let total: usize = sets.iter().map(|s| s.size()).sum();
        let slot_baseline = if total == 0 {
            1.0
        } else {
            let weighted: f64 = sets
                .iter()
                .map(|s| s.size() as f64 * slots_needed(s.size(), s.max_unavailable) as f64)
                .sum();
            (weighted / total as f64).max(1.0)
        };
        Self { weights, penalty, sets, slot_baseline }
    }

    fn movement_term(&self, snapshot: &ClusterSnapshot, assignment: &[usize]) -> f64 {
        let total: usize = self.sets.iter().map(|s| s.size()).sum();
        if total == 0 {
            return 0.0;
        }
        let weighted: f64 = self
            .sets
            .iter()
            .map(|s| {
                let moved = s.moved(snapshot, assignment).len();
                s.size() as f64 * self.penalty.apply(moved as f64 / s.size() as f64)
            })
            .sum();
        weighted / total as f64
    }

    fn cold_start_term(&self, snapshot: &ClusterSnapshot, assignment: &[usize]) -> f64 {
        let mut moved = 0usize;
        let mut cold = 0.0;
        for (i, pod) in snapshot.pods.iter().enumerate() {
            if assignment[i] != pod.node_index {
                moved += 1;
                cold += pod.cold_start_seconds;
            }
        }
        if moved == 0 {
            0.0
        } else {
            (cold / (moved as f64 * COLD_START_BASELINE_SECS)).min(1.0)
        }
    }

    fn time_slot_term(&self, snapshot: &ClusterSnapshot, assignment: &[usize]) -> f64 {
        let worst = self
            .sets
            .iter()
            .map(|s| slots_needed(s.moved(snapshot, assignment).len(), s.max_unavailable))
            .max()
            .unwrap_or(0);
        (worst as f64 / self.slot_baseline).min(1.0)
    }
}

impl Objective for DisruptionObjective {
    fn name(&self) -> &'static str {
        "disruption"
    }

    fn evaluate(&self, assignment: &[usize], snapshot: &ClusterSnapshot) -> f64 {
        self.weights.movement * self.movement_term(snapshot, assignment)
            + self.weights.cold_start * self.cold_start_term(snapshot, assignment)
            + self.weights.time_slots * self.time_slot_term(snapshot, assignment)
    }
}
