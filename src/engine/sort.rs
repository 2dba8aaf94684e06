//! Pure pieces of NSGA-II: dominance, fast non-dominated sort and
//! crowding distance. The generational loop composes these.

/// Strict Pareto dominance: no worse everywhere, better somewhere.
pub fn pareto_dominates(a: &[f64], b: &[f64]) -> bool {
    let mut better_somewhere = false;
    for (x, y) in a.iter().zip(b) {
        if x > y {
            return false;
        }
        if x < y {
            better_somewhere = true;
        }
    }
    better_somewhere
}

/// Feasibility-aware dominance: a feasible individual always dominates an
/// infeasible one, and between two infeasible individuals the smaller
/// constraint violation wins.
pub fn constrained_dominates(a: &[f64], a_violation: f64, b: &[f64], b_violation: f64) -> bool {
    match (a_violation <= 0.0, b_violation <= 0.0) {
        (true, false) => true,
        (false, true) => false,
        (false, false) => a_violation < b_violation,
        (true, true) => pareto_dominates(a, b),
    }
}

/// Fast non-dominated sort. Returns fronts of indices into the input,
/// best front first.
pub fn non_dominated_sort(objectives: &[Vec<f64>], violations: &[f64]) -> Vec<Vec<usize>> {
    let n = objectives.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];
    let mut fronts: Vec<Vec<usize>> = vec![Vec::new()];

    for a in 0..n {
        for b in 0..n {
            if a == b {
                continue;
            }
            if constrained_dominates(&objectives[a], violations[a], &objectives[b], violations[b]) {
                dominated_by[a].push(b);
            } else if constrained_dominates(
                &objectives[b],
                violations[b],
                &objectives[a],
                violations[a],
            ) {
                domination_count[a] += 1;
            }
        }
        if domination_count[a] == 0 {
            fronts[0].push(a);
        }
    }

    let mut current = 0;
    while !fronts[current].is_empty() {
        let mut next = Vec::new();
        for &a in &fronts[current] {
            for &b in &dominated_by[a] {
                domination_count[b] -= 1;
                if domination_count[b] == 0 {
                    next.push(b);
                }
            }
        }
        current += 1;
        fronts.push(next);
    }
    fronts.pop(); // trailing empty front
    fronts
}

/// Crowding distance for one front, parallel to `front`. Boundary points
/// get infinity; interior points sum their normalized neighbor span over
/// each objective.
pub fn crowding_distance(front: &[usize], objectives: &[Vec<f64>]) -> Vec<f64> {
    let size = front.len();
    let mut distance = vec![0.0f64; size];
    if size == 0 {
        return distance;
    }
    if size <= 2 {
        return vec![f64::INFINITY; size];
    }
    let objective_count = objectives[front[0]].len();

    // Positions within the front, re-sorted per objective.
    let mut order: Vec<usize> = (0..size).collect();
    for k in 0..objective_count {
        order.sort_by(|&a, &b| objectives[front[a]][k].total_cmp(&objectives[front[b]][k]));
        let lo = objectives[front[order[0]]][k];
        let hi = objectives[front[order[size - 1]]][k];
        distance[order[0]] = f64::INFINITY;
        distance[order[size - 1]] = f64::INFINITY;
        let span = hi - lo;
        if span.abs() <= f64::EPSILON {
            continue;
        }
        for w in 1..size - 1 {
            let prev = objectives[front[order[w - 1]]][k];
            let next = objectives[front[order[w + 1]]][k];
            distance[order[w]] += (next - prev) / span;
        }
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominance_requires_strict_improvement() {
        assert!(pareto_dominates(&[1.0, 1.0], &[2.0, 1.0]));
        assert!(!pareto_dominates(&[1.0, 1.0], &[1.0, 1.0]));
        assert!(!pareto_dominates(&[1.0, 2.0], &[2.0, 1.0]));
    }

    #[test]
    fn feasible_beats_infeasible_regardless_of_objectives() {
        assert!(constrained_dominates(&[9.0, 9.0], 0.0, &[0.0, 0.0], 1.0));
        assert!(!constrained_dominates(&[0.0, 0.0], 1.0, &[9.0, 9.0], 0.0));
    }

    #[test]
    fn smaller_violation_wins_between_infeasibles() {
        assert!(constrained_dominates(&[5.0], 0.1, &[1.0], 0.5));
        assert!(!constrained_dominates(&[1.0], 0.5, &[5.0], 0.1));
    }

    #[test]
    fn sort_layers_fronts() {
        let objectives = vec![
            vec![1.0, 1.0], // front 0
            vec![2.0, 2.0], // dominated by 0
            vec![0.5, 3.0], // front 0 (trade-off)
            vec![3.0, 3.0], // dominated by 0 and 1
        ];
        let violations = vec![0.0; 4];
        let fronts = non_dominated_sort(&objectives, &violations);
        assert_eq!(fronts.len(), 3);
        assert_eq!(fronts[0], vec![0, 2]);
        assert_eq!(fronts[1], vec![1]);
        assert_eq!(fronts[2], vec![3]);
    }

    #[test]
    fn infeasible_individuals_fall_behind() {
        let objectives = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let violations = vec![2.0, 0.0];
        let fronts = non_dominated_sort(&objectives, &violations);
        assert_eq!(fronts[0], vec![1]);
        assert_eq!(fronts[1], vec![0]);
    }

    #[test]
    fn crowding_boundary_points_are_infinite() {
        let objectives = vec![
            vec![0.0, 4.0],
            vec![1.0, 2.0],
            vec![2.0, 1.0],
            vec![4.0, 0.0],
        ];
        let front: Vec<usize> = (0..4).collect();
        let d = crowding_distance(&front, &objectives);
        assert_eq!(d[0], f64::INFINITY);
        assert_eq!(d[3], f64::INFINITY);
        assert!(d[1].is_finite() && d[1] > 0.0);
        assert!(d[2].is_finite() && d[2] > 0.0);
    }

    #[test]
    fn crowding_prefers_lonely_points() {
        // Index 1 sits close to 0; index 2 is far from both neighbors.
        let objectives = vec![
            vec![0.0, 10.0],
            vec![0.5, 9.5],
            vec![5.0, 5.0],
            vec![10.0, 0.0],
        ];
        let front: Vec<usize> = (0..4).collect();
        let d = crowding_distance(&front, &objectives);
        assert!(d[2] > d[1]);
    }

    #[test]
    fn tiny_fronts_are_all_infinite() {
        let objectives = vec![vec![1.0], vec![2.0]];
        assert_eq!(crowding_distance(&[0, 1], &objectives), vec![f64::INFINITY; 2]);
        assert!(crowding_distance(&[], &objectives).is_empty());
    }
}
