//! NSGA-II over integer pod→node assignments.
//!
//! The loop composes the pure pieces in [`sort`] with the genetic
//! operators in [`operators`]: evaluate, non-dominated sort, crowding,
//! tournament selection, uniform crossover, per-gene mutation, elitist
//! replacement from the combined parent+offspring pool.

use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::problem::Problem;

pub mod operators;
pub mod sort;

use operators::{mutate, tournament_select, uniform_crossover};
use sort::{crowding_distance, non_dominated_sort};

#[derive(Debug, Clone)]
pub struct Nsga2Config {
    pub population_size: usize,
    pub max_generations: usize,
    pub crossover_probability: f64,
    pub mutation_probability: f64,
    pub tournament_size: usize,
    pub parallel_evaluation: bool,
    /// Cap on the share of the initial population taken from seeds.
    pub seed_fraction: f64,
}

impl Default for Nsga2Config {
    fn default() -> Self {
        Self {
            population_size: 100,
            max_generations: 50,
            crossover_probability: 0.9,
            mutation_probability: 0.3,
            tournament_size: 3,
            parallel_evaluation: true,
            seed_fraction: 0.7,
        }
    }
}

/// One candidate assignment with its cached evaluation and sort keys.
#[derive(Debug, Clone)]
pub struct Individual {
    pub genes: Vec<usize>,
    pub objectives: Vec<f64>,
    pub violation: f64,
    pub rank: usize,
    pub crowding: f64,
}

impl Individual {
    fn unevaluated(genes: Vec<usize>) -> Self {
        Self { genes, objectives: Vec::new(), violation: 0.0, rank: usize::MAX, crowding: 0.0 }
    }

    pub fn feasible(&self) -> bool {
        self.violation <= 0.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("optimization cancelled")]
    Cancelled,
}

pub struct Nsga2<'a> {
    problem: &'a Problem,
    config: Nsga2Config,
}

impl<'a> Nsga2<'a> {
    pub fn new(problem: &'a Problem, config: Nsga2Config) -> Self {
        Self { problem, config }
    }

    /// Run the generational loop to completion and return the final,
    /// fully evaluated and ranked population.
    ///
    /// `seeds` are assignments from a prior run; up to `seed_fraction`
    /// of the initial population is copied from them verbatim, with
    /// out-of-range genes clipped. Cancellation is honored between
    /// generations and leaves no side effects.
    pub fn run<R: Rng>(
        &self,
        seeds: &[Vec<usize>],
        cancel: &CancellationToken,
        rng: &mut R,
    ) -> Result<Vec<Individual>, EngineError> {
        let mut population = self.initial_population(seeds, rng);
        self.evaluate(&mut population);
        assign_rank_and_crowding(&mut population);

        for generation in 0..self.config.max_generations {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let mut offspring = self.make_offspring(&population, rng);
            self.evaluate(&mut offspring);

            let mut combined = population;
            combined.append(&mut offspring);
            population = select_survivors(combined, self.config.population_size);

            if generation % 10 == 0 {
                let feasible = population.iter().filter(|i| i.feasible()).count();
                debug!(generation, feasible, "generation complete");
            }
        }
        Ok(population)
    }

    fn initial_population<R: Rng>(&self, seeds: &[Vec<usize>], rng: &mut R) -> Vec<Individual> {
        let size = self.config.population_size.max(2);
        let nodes = self.problem.node_count();
        let seed_cap = ((size as f64) * self.config.seed_fraction.clamp(0.0, 1.0)) as usize;
        let take = seeds.len().min(seed_cap);

        let mut genes: Vec<Vec<usize>> = seeds[..take]
            .iter()
            .map(|s| {
                s.iter()
                    .map(|&g| g.min(nodes.saturating_sub(1)))
                    .collect()
            })
            .collect();
        genes.extend(self.problem.initialize(size - take, rng));
        genes.truncate(size);
        genes.into_iter().map(Individual::unevaluated).collect()
    }

    fn evaluate(&self, individuals: &mut [Individual]) {
        let eval = |ind: &mut Individual| {
            let (objectives, violation) = self.problem.evaluate(&ind.genes);
            ind.objectives = objectives;
            ind.violation = violation;
        };
        if self.config.parallel_evaluation {
            individuals.par_iter_mut().for_each(eval);
        } else {
            individuals.iter_mut().for_each(eval);
        }
    }

    fn make_offspring<R: Rng>(&self, population: &[Individual], rng: &mut R) -> Vec<Individual> {
        let size = self.config.population_size;
        let nodes = self.problem.node_count();
        let genes = self.problem.variable_count().max(1);
        let per_gene = self.config.mutation_probability / genes as f64;

        let mut offspring = Vec::with_capacity(size + 1);
        while offspring.len() < size {
            let a = tournament_select(population, self.config.tournament_size, rng);
            let b = tournament_select(population, self.config.tournament_size, rng);
            let (mut left, mut right) = if rng.gen_bool(self.config.crossover_probability.clamp(0.0, 1.0))
            {
                uniform_crossover(&a.genes, &b.genes, rng)
            } else {
                (a.genes.clone(), b.genes.clone())
            };
            mutate(&mut left, per_gene, nodes, rng);
            mutate(&mut right, per_gene, nodes, rng);
            offspring.push(Individual::unevaluated(left));
            offspring.push(Individual::unevaluated(right));
        }
        offspring.truncate(size);
        offspring
    }
}

/// Recompute rank and crowding across a whole population in place.
fn assign_rank_and_crowding(population: &mut [Individual]) {
    let objectives: Vec<Vec<f64>> = population.iter().map(|i| i.objectives.clone()).collect();
    let violations: Vec<f64> = population.iter().map(|i| i.violation).collect();
    for (rank, front) in non_dominated_sort(&objectives, &violations).iter().enumerate() {
        let distances = crowding_distance(front, &objectives);
        for (&i, &d) in front.iter().zip(&distances) {
            population[i].rank = rank;
            population[i].crowding = d;
        }
    }
}

/// Elitist replacement: fill from the best fronts of the combined pool,
/// truncating the last front by descending crowding distance.
pub(crate) fn select_survivors(mut combined: Vec<Individual>, target: usize) -> Vec<Individual> {
    assign_rank_and_crowding(&mut combined);

    let objectives: Vec<Vec<f64>> = combined.iter().map(|i| i.objectives.clone()).collect();
    let violations: Vec<f64> = combined.iter().map(|i| i.violation).collect();
    let fronts = non_dominated_sort(&objectives, &violations);

    let mut keep: Vec<usize> = Vec::with_capacity(target);
    for front in fronts {
        if keep.len() + front.len() <= target {
            keep.extend(front);
        } else {
            let mut by_crowding = front;
            by_crowding.sort_by(|&a, &b| combined[b].crowding.total_cmp(&combined[a].crowding));
            by_crowding.truncate(target - keep.len());
            keep.extend(by_crowding);
            break;
        }
    }

    keep.sort_unstable();
    let mut survivors = Vec::with_capacity(keep.len());
    // Walk indices descending so swap_remove never disturbs a kept slot.
    for &i in keep.iter().rev() {
        survivors.push(combined.swap_remove(i));
    }
    survivors.reverse();
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcsh::GcshSampler;
    use crate::model::{ClusterSnapshot, Lifecycle, NodeRecord, PodRecord};
    use crate::objectives::{
        BalanceConfig, BalanceObjective, CostObjective, DisruptionObjective, DisruptionWeights,
        MovementPenalty, Objective,
    };
    use crate::problem::InitStrategy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    fn node(name: &str, lifecycle: Lifecycle, cpv: f64, cpg: f64) -> NodeRecord {
        NodeRecord {
            name: name.into(),
            cpu_millis: 4000,
            mem_bytes: 8 << 30,
            region: "eu".into(),
            instance_type: "m5.xlarge".into(),
            lifecycle,
            cost_per_vcpu: cpv,
            cost_per_gib: cpg,
            hourly_cost: cpv * 4.0 + cpg * 8.0,
        }
    }

    fn pod(name: &str, rs: &str, node_index: usize) -> PodRecord {
        PodRecord {
            namespace: "default".into(),
            name: name.into(),
            cpu_millis: 1000,
            mem_bytes: 1 << 30,
            replica_set: rs.into(),
            max_unavailable: 2,
            cold_start_seconds: 10.0,
            node_index,
        }
    }

    fn test_problem() -> Problem {
        let snapshot = Arc::new(ClusterSnapshot {
            nodes: vec![
                node("od-1", Lifecycle::OnDemand, 0.024, 0.006),
                node("od-2", Lifecycle::OnDemand, 0.024, 0.006),
                node("spot-1", Lifecycle::Spot, 0.009, 0.002),
                node("spot-2", Lifecycle::Spot, 0.009, 0.002),
            ],
            pods: vec![
                pod("web-0", "web", 0),
                pod("web-1", "web", 0),
                pod("web-2", "web", 1),
                pod("web-3", "web", 1),
            ],
        });
        let population_size = 24;
        let objectives: Vec<Box<dyn Objective>> = vec![
            Box::new(CostObjective::new(&snapshot, population_size)),
            Box::new(DisruptionObjective::new(
                &snapshot,
                DisruptionWeights::default(),
                MovementPenalty::Linear,
            )),
            Box::new(BalanceObjective::new(BalanceConfig::default())),
        ];
        Problem::new(
            snapshot,
            objectives,
            InitStrategy::WarmStart(GcshSampler::default()),
        )
    }

    fn config() -> Nsga2Config {
        Nsga2Config {
            population_size: 24,
            max_generations: 15,
            parallel_evaluation: false,
            ..Nsga2Config::default()
        }
    }

    fn evaluated(genes: Vec<usize>, objectives: Vec<f64>, violation: f64) -> Individual {
        Individual { genes, objectives, violation, rank: usize::MAX, crowding: 0.0 }
    }

    #[test]
    fn run_returns_full_ranked_population() {
        let problem = test_problem();
        let engine = Nsga2::new(&problem, config());
        let mut rng = StdRng::seed_from_u64(42);
        let population = engine
            .run(&[], &CancellationToken::new(), &mut rng)
            .unwrap();
        assert_eq!(population.len(), 24);
        for ind in &population {
            assert_eq!(ind.objectives.len(), 3);
            assert!(ind.genes.iter().all(|&g| g < 4));
            assert_ne!(ind.rank, usize::MAX);
        }
        // Elitism over a feasible warm start keeps the front feasible.
        assert!(population.iter().any(|i| i.rank == 0 && i.feasible()));
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let problem = test_problem();
        let engine = Nsga2::new(&problem, config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            engine.run(&[], &cancel, &mut rng),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn seeds_enter_the_initial_population_clipped() {
        let problem = test_problem();
        let engine = Nsga2::new(&problem, config());
        let mut rng = StdRng::seed_from_u64(2);
        // Out-of-range node index 99 must be clipped into bounds.
        let seeds = vec![vec![99, 0, 0, 0]];
        let population = engine.initial_population(&seeds, &mut rng);
        assert_eq!(population.len(), 24);
        assert_eq!(population[0].genes, vec![3, 0, 0, 0]);
    }

    #[test]
    fn seed_fraction_caps_seed_share() {
        let problem = test_problem();
        let engine = Nsga2::new(&problem, config());
        let mut rng = StdRng::seed_from_u64(3);
        let seeds: Vec<Vec<usize>> = (0..100).map(|_| vec![0, 0, 0, 0]).collect();
        let population = engine.initial_population(&seeds, &mut rng);
        assert_eq!(population.len(), 24);
        // At most 70% of 24 = 16 seeds taken.
        let seeded = population.iter().filter(|i| i.genes == vec![0, 0, 0, 0]).count();
        assert!(seeded >= 16, "expected at least the seeded 16, got {seeded}");
    }

    #[test]
    fn survivors_never_drop_a_dominator_for_the_dominated() {
        // Index 0 dominates index 1; truncation to any size keeping 1
        // must keep 0 as well.
        let combined = vec![
            evaluated(vec![0], vec![0.1, 0.1], 0.0),
            evaluated(vec![1], vec![0.5, 0.5], 0.0),
            evaluated(vec![2], vec![0.05, 0.6], 0.0),
            evaluated(vec![3], vec![0.6, 0.05], 0.0),
        ];
        let survivors = select_survivors(combined, 3);
        let kept: Vec<Vec<usize>> = survivors.iter().map(|i| i.genes.clone()).collect();
        assert!(kept.contains(&vec![0]), "dominator lost: {kept:?}");
        assert!(!kept.contains(&vec![1]), "dominated survived over front 0");
    }

    #[test]
    fn elitist_replacement_prefers_feasible() {
        let combined = vec![
            evaluated(vec![0], vec![0.0, 0.0], 5.0), // infeasible, great objectives
            evaluated(vec![1], vec![0.9, 0.9], 0.0), // feasible
        ];
        let survivors = select_survivors(combined, 1);
        assert_eq!(survivors[0].genes, vec![1]);
    }

    #[test]
    fn last_front_truncates_by_crowding() {
        // Four mutually non-dominated points; the extreme ones carry
        // infinite crowding and must survive truncation to two.
        let combined = vec![
            evaluated(vec![0], vec![0.0, 1.0], 0.0),
            evaluated(vec![1], vec![0.4, 0.6], 0.0),
            evaluated(vec![2], vec![0.6, 0.4], 0.0),
            evaluated(vec![3], vec![1.0, 0.0], 0.0),
        ];
        let survivors = select_survivors(combined, 2);
        let mut kept: Vec<Vec<usize>> = survivors.iter().map(|i| i.genes.clone()).collect();
        kept.sort();
        assert_eq!(kept, vec![vec![0], vec![3]]);
    }
}
