//! Genetic operators over integer assignment vectors.

use rand::Rng;

use crate::engine::Individual;

/// k-way tournament on `(rank, crowding)`: lower rank wins, larger
/// crowding breaks ties.
pub fn tournament_select<'a, R: Rng>(
    population: &'a [Individual],
    tournament_size: usize,
    rng: &mut R,
) -> &'a Individual {
    let mut best = &population[rng.gen_range(0..population.len())];
    for _ in 1..tournament_size.max(2) {
        let challenger = &population[rng.gen_range(0..population.len())];
        if challenger.rank < best.rank
            || (challenger.rank == best.rank && challenger.crowding > best.crowding)
        {
            best = challenger;
        }
    }
    best
}

/// Uniform crossover: each gene swaps between the children with
/// probability one half.
pub fn uniform_crossover<R: Rng>(
    a: &[usize],
    b: &[usize],
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>) {
    let mut left = a.to_vec();
    let mut right = b.to_vec();
    for i in 0..left.len().min(right.len()) {
        if rng.gen_bool(0.5) {
            std::mem::swap(&mut left[i], &mut right[i]);
        }
    }
    (left, right)
}

/// Per-gene reassignment to a uniformly random node.
pub fn mutate<R: Rng>(genes: &mut [usize], per_gene_probability: f64, node_count: usize, rng: &mut R) {
    if node_count == 0 {
        return;
    }
    for gene in genes.iter_mut() {
        if rng.gen_bool(per_gene_probability.clamp(0.0, 1.0)) {
            *gene = rng.gen_range(0..node_count);
        }
    }
}
