use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::gcsh::GcshSampler;
use crate::model::ClusterSnapshot;
use crate::objectives::Objective;

/// Attempts to find a fitting node for one pod during random
/// initialization before giving up on the individual.
const PLACEMENT_ATTEMPTS: usize = 100;

/// How the initial population is constructed.
pub enum InitStrategy {
    /// Greedy constructive warm start.
    WarmStart(GcshSampler),
    /// Constraint-aware uniform random placement.
    Random,
}

/// The integer-encoded assignment problem the engine optimizes: one gene
/// per pod, each a node index, subject to node capacity.
pub struct Problem {
    snapshot: Arc<ClusterSnapshot>,
    objectives: Vec<Box<dyn Objective>>,
    init: InitStrategy,
}

impl Problem {
    pub fn new(
        snapshot: Arc<ClusterSnapshot>,
        objectives: Vec<Box<dyn Objective>>,
        init: InitStrategy,
    ) -> Self {
        Self { snapshot, objectives, init }
    }

    pub fn snapshot(&self) -> &ClusterSnapshot {
        &self.snapshot
    }

    pub fn variable_count(&self) -> usize {
        self.snapshot.pods.len()
    }

    pub fn node_count(&self) -> usize {
        self.snapshot.nodes.len()
    }

    /// Valid gene range, identical for every position.
    pub fn bounds(&self) -> std::ops::Range<usize> {
        0..self.node_count()
    }

    pub fn objective_count(&self) -> usize {
        self.objectives.len()
    }

    pub fn objective_names(&self) -> Vec<&'static str> {
        self.objectives.iter().map(|o| o.name()).collect()
    }

    /// Objective vector and constraint violation for one assignment.
    /// Pure apart from normalization bookkeeping inside the objectives.
    pub fn evaluate(&self, genes: &[usize]) -> (Vec<f64>, f64) {
        let values = self
            .objectives
            .iter()
            .map(|o| o.evaluate(genes, &self.snapshot))
            .collect();
        (values, self.snapshot.capacity_violation(genes))
    }

    /// Build the base population, delegating to the configured strategy.
    pub fn initialize<R: Rng>(&self, population_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
        match &self.init {
            InitStrategy::WarmStart(sampler) => sampler.sample(&self.snapshot, population_size, rng),
            InitStrategy::Random => (0..population_size)
                .map(|_| self.random_individual(rng))
                .collect(),
        }
    }

    /// One random assignment that respects capacity where possible: each
    /// pod draws nodes until one fits. An individual whose pods exhaust
    /// their attempts degrades to round-robin and relies on the engine's
    /// constraint handling.
    pub fn random_individual<R: Rng>(&self, rng: &mut R) -> Vec<usize> {
        let nodes = self.node_count();
        if nodes == 0 {
            return Vec::new();
        }
        let mut free: Vec<(i64, i64)> = self
            .snapshot
            .nodes
            .iter()
            .map(|n| (n.cpu_millis, n.mem_bytes))
            .collect();
        let mut genes = Vec::with_capacity(self.variable_count());
        for pod in &self.snapshot.pods {
            let mut placed = None;
            for _ in 0..PLACEMENT_ATTEMPTS {
                let n = rng.gen_range(0..nodes);
                if free[n].0 >= pod.cpu_millis && free[n].1 >= pod.mem_bytes {
                    placed = Some(n);
                    break;
                }
            }
            match placed {
                Some(n) => {
                    free[n].0 -= pod.cpu_millis;
                    free[n].1 -= pod.mem_bytes;
                    genes.push(n);
                }
                None => {
                    debug!(pod = %pod.name, "no feasible node found, degrading to round-robin seed");
                    return self.round_robin();
                }
            }
        }
        genes
    }

    fn round_robin(&self) -> Vec<usize> {
        let nodes = self.node_count();
        (0..self.variable_count()).map(|i| i % nodes).collect()
    }
}
