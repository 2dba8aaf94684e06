//! One rebalance cycle: gate, snapshot, seed, optimize, publish, evict.
//!
//! Ordering is load-bearing: the hint is published strictly before any
//! eviction, and a publication failure aborts the cycle so coordinated
//! schedulers never see evictions without a hint to claim against.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::{build_snapshot, count_unschedulable_pods, AdapterError, Snapshot};
use crate::config::Settings;
use crate::engine::{EngineError, Nsga2};
use crate::execution::{execute_moves, feasible_moves, EvictionSummary};
use crate::fingerprint::{cluster_fingerprint, seed_decision};
use crate::gcsh::GcshSampler;
use crate::hint::{build_hint, reconstruct_assignment, SchedulingHint};
use crate::model::{ClusterSnapshot, MovementBreakdown};
use crate::objectives::{
    BalanceObjective, CostObjective, DisruptionObjective, Objective,
};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::pareto::rank_solutions;
use crate::pricing::PriceBook;
use crate::problem::{InitStrategy, Problem};
use crate::reservation;
use crate::store::{HintStore, StoreError};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    /// Publication failed; no eviction was issued.
    #[error("hint publication failed: {0}")]
    Publication(#[source] StoreError),
}

/// What one cycle did. A skipped cycle is an outcome, not an error.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Unschedulable pods exist; optimizing now would thrash.
    SkippedUnstable { unschedulable: usize },
    /// Nothing to optimize.
    EmptyCluster,
    /// Cancelled before publication; no state was changed.
    Cancelled,
    Completed {
        fingerprint: String,
        solutions_published: usize,
        top_movements: usize,
        evictions: EvictionSummary,
    },
}

pub struct Rebalancer {
    pub orchestrator: Orchestrator,
    pub store: HintStore,
    pub prices: PriceBook,
    pub settings: Settings,
}

impl Rebalancer {
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome, CycleError> {
        let unschedulable = count_unschedulable_pods(&self.orchestrator).await?;
        if unschedulable > 0 {
            info!(unschedulable, "cluster has unschedulable pods, skipping cycle");
            return Ok(CycleOutcome::SkippedUnstable { unschedulable });
        }

        let snapshot = build_snapshot(&self.orchestrator, &self.prices).await?;
        if snapshot.cluster.nodes.is_empty() || snapshot.cluster.pods.is_empty() {
            return Ok(CycleOutcome::EmptyCluster);
        }

        let fingerprint = cluster_fingerprint(&snapshot.cluster);
        let seeds = self.collect_seeds(&snapshot.cluster, &fingerprint).await;

        if cancel.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }
        let cluster = Arc::new(snapshot.cluster.clone());
        let problem = self.build_problem(Arc::clone(&cluster));
        let engine = Nsga2::new(&problem, self.settings.engine());
        info!(
            nodes = cluster.nodes.len(),
            pods = cluster.pods.len(),
            seeds = seeds.len(),
            %fingerprint,
            "starting optimization"
        );
        let mut rng = StdRng::from_entropy();
        let population = match engine.run(&seeds, cancel, &mut rng) {
            Ok(population) => population,
            Err(EngineError::Cancelled) => return Ok(CycleOutcome::Cancelled),
        };

        let ranked = rank_solutions(
            &population,
            &self.settings.ranking_weights(),
            &snapshot.cluster,
        );
        if ranked.is_empty() {
            return Ok(CycleOutcome::EmptyCluster);
        }

        if cancel.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }
        let expiration = Utc::now() + Duration::hours(self.settings.hint_ttl_hours);
        let hint = build_hint(
            &snapshot.cluster,
            &fingerprint,
            &ranked,
            self.settings.max_published_solutions,
            expiration,
        );
        let published = hint.spec.solutions.len();
        self.store.upsert(hint).await.map_err(CycleError::Publication)?;
        self.delete_expired_hints().await;

        let top = &ranked[0];
        let breakdown = MovementBreakdown::of(&snapshot.cluster, &top.assignment);
        info!(
            %fingerprint,
            published,
            weighted_score = top.weighted_score,
            movements = top.movement_count,
            on_demand_to_spot = breakdown.on_demand_to_spot,
            spot_to_on_demand = breakdown.spot_to_on_demand,
            type_change = breakdown.type_change,
            same_type = breakdown.same_type,
            "hint published"
        );

        let evictions = self.execute(&snapshot, top.assignment.as_slice(), cancel).await;
        Ok(CycleOutcome::Completed {
            fingerprint,
            solutions_published: published,
            top_movements: top.movement_count,
            evictions,
        })
    }

    /// Claim a hint slot for one pod of `rs_key` under the configured
    /// retry policy. Entry point for downstream scheduler callers.
    pub async fn reserve_node(&self, rs_key: &str) -> Result<Option<String>, StoreError> {
        reservation::reserve_node(&self.store, rs_key, &self.settings.reservation()).await
    }

    fn build_problem(&self, cluster: Arc<ClusterSnapshot>) -> Problem {
        let objectives: Vec<Box<dyn Objective>> = vec![
            Box::new(CostObjective::new(&cluster, self.settings.population_size)),
            Box::new(DisruptionObjective::new(
                &cluster,
                self.settings.disruption_weights(),
                self.settings.movement_penalty,
            )),
            Box::new(BalanceObjective::new(self.settings.balance())),
        ];
        let init = if self.settings.warm_start {
            InitStrategy::WarmStart(GcshSampler {
                include_current_state: self.settings.include_current_state,
            })
        } else {
            InitStrategy::Random
        };
        Problem::new(cluster, objectives, init)
    }

    /// Prior-hint solutions to seed from, if the cluster delta permits.
    /// Any store hiccup here degrades to an unseeded run.
    async fn collect_seeds(&self, cluster: &ClusterSnapshot, fingerprint: &str) -> Vec<Vec<usize>> {
        let hints = match self.store.list().await {
            Ok(hints) => hints,
            Err(error) => {
                warn!(%error, "could not list prior hints, running unseeded");
                return Vec::new();
            }
        };
        let now = Utc::now();
        let mut active: Vec<SchedulingHint> =
            hints.into_iter().filter(|h| !h.is_expired(now)).collect();
        // Exact fingerprint match first, then the freshest survivor.
        active.sort_by(|a, b| {
            let exact = |h: &SchedulingHint| h.spec.cluster_fingerprint != fingerprint;
            (exact(a), &b.spec.expiration_time).cmp(&(exact(b), &a.spec.expiration_time))
        });
        let Some(prior) = active.first() else {
            return Vec::new();
        };

        let decision = seed_decision(
            &prior.spec.cluster_fingerprint,
            &prior.spec.cluster_nodes,
            &prior.rs_counts(),
            cluster,
        );
        info!(decision = ?decision, "prior hint evaluated for seeding");
        if !decision.allows_seeding() {
            return Vec::new();
        }
        prior
            .spec
            .solutions
            .iter()
            .map(|s| reconstruct_assignment(cluster, s))
            .collect()
    }

    async fn execute(
        &self,
        snapshot: &Snapshot,
        target: &[usize],
        cancel: &CancellationToken,
    ) -> EvictionSummary {
        if cancel.is_cancelled() {
            return EvictionSummary::default();
        }
        let moves = feasible_moves(&snapshot.cluster, target);
        let summary = execute_moves(&self.orchestrator, snapshot, &moves).await;
        info!(
            feasible = moves.len(),
            evicted = summary.evicted,
            skipped = summary.skipped,
            "eviction pass complete"
        );
        summary
    }

    async fn delete_expired_hints(&self) {
        let hints = match self.store.list().await {
            Ok(hints) => hints,
            Err(_) => return,
        };
        let now = Utc::now();
        for hint in hints.into_iter().filter(|h| h.is_expired(now)) {
            let Some(name) = hint.metadata.name else { continue };
            if let Err(error) = self.store.delete(&name).await {
                warn!(hint = %name, %error, "could not delete expired hint");
            }
        }
    }
}
