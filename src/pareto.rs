//! Post-processing of a finished population: extract the best front,
//! rank it by weighted score, and deduplicate.

use std::collections::HashSet;

use crate::engine::Individual;
use crate::engine::sort::non_dominated_sort;
use crate::model::ClusterSnapshot;

/// One ranked target assignment, ready for publication.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionResult {
    pub assignment: Vec<usize>,
    /// Normalized objective values, in the engine's objective order.
    pub objectives: Vec<f64>,
    pub weighted_score: f64,
    /// Pods whose target differs from the snapshot placement.
    pub movement_count: usize,
}

/// Extract the first front, score it with the user's weights, sort
/// ascending, and deduplicate.
///
/// Duplicates are keyed by the assignment vector alone; the first
/// occurrence after sorting survives. At most one no-movement solution is
/// retained — the cheapest one, which sorting has already put first.
pub fn rank_solutions(
    population: &[Individual],
    weights: &[f64],
    snapshot: &ClusterSnapshot,
) -> Vec<SolutionResult> {
    let objectives: Vec<Vec<f64>> = population.iter().map(|i| i.objectives.clone()).collect();
    let violations: Vec<f64> = population.iter().map(|i| i.violation).collect();
    let fronts = non_dominated_sort(&objectives, &violations);
    let Some(first) = fronts.first() else {
        return Vec::new();
    };

    let mut solutions: Vec<SolutionResult> = first
        .iter()
        .map(|&i| {
            let ind = &population[i];
            SolutionResult {
                assignment: ind.genes.clone(),
                objectives: ind.objectives.clone(),
                weighted_score: weighted_score(&ind.objectives, weights),
                movement_count: snapshot.movement_count(&ind.genes),
            }
        })
        .collect();
    solutions.sort_by(|a, b| a.weighted_score.total_cmp(&b.weighted_score));
    dedupe(solutions)
}

pub fn weighted_score(objectives: &[f64], weights: &[f64]) -> f64 {
    objectives
        .iter()
        .zip(weights)
        .map(|(o, w)| o * w)
        .sum()
}

/// Drop repeated assignments and all but the best-scoring no-movement
/// solution. Idempotent.
fn dedupe(solutions: Vec<SolutionResult>) -> Vec<SolutionResult> {
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut kept_no_movement = false;
    let mut out = Vec::with_capacity(solutions.len());
    for solution in solutions {
        if !seen.insert(solution.assignment.clone()) {
            continue;
        }
        if solution.movement_count == 0 {
            if kept_no_movement {
                continue;
            }
            kept_no_movement = true;
        }
        out.push(solution);
    }
    out
}
