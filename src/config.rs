use std::time::Duration;

use envconfig::Envconfig;

use crate::engine::Nsga2Config;
use crate::objectives::{BalanceConfig, DisruptionWeights, MovementPenalty};
use crate::reservation::ReservationConfig;

/// Runtime settings, loaded from the environment. Every field has a
/// default so an empty environment produces a working rebalancer.
#[derive(Envconfig, Debug, Clone)]
pub struct Settings {
    // ── Engine ───────────────────────────────────────────────────────
    #[envconfig(from = "DRIFT_POPULATION_SIZE", default = "100")]
    pub population_size: usize,
    #[envconfig(from = "DRIFT_MAX_GENERATIONS", default = "50")]
    pub max_generations: usize,
    #[envconfig(from = "DRIFT_CROSSOVER_PROBABILITY", default = "0.9")]
    pub crossover_probability: f64,
    #[envconfig(from = "DRIFT_MUTATION_PROBABILITY", default = "0.3")]
    pub mutation_probability: f64,
    #[envconfig(from = "DRIFT_TOURNAMENT_SIZE", default = "3")]
    pub tournament_size: usize,
    #[envconfig(from = "DRIFT_PARALLEL_EVALUATION", default = "true")]
    pub parallel_evaluation: bool,
    /// Share of the initial population filled from a prior run's
    /// solutions when the cluster delta allows seeding.
    #[envconfig(from = "DRIFT_SEED_FRACTION", default = "0.7")]
    pub seed_fraction: f64,
    #[envconfig(from = "DRIFT_WARM_START", default = "true")]
    pub warm_start: bool,
    #[envconfig(from = "DRIFT_INCLUDE_CURRENT_STATE", default = "true")]
    pub include_current_state: bool,

    // ── Solution ranking ─────────────────────────────────────────────
    #[envconfig(from = "DRIFT_WEIGHT_COST", default = "0.5")]
    pub weight_cost: f64,
    #[envconfig(from = "DRIFT_WEIGHT_DISRUPTION", default = "0.3")]
    pub weight_disruption: f64,
    #[envconfig(from = "DRIFT_WEIGHT_BALANCE", default = "0.2")]
    pub weight_balance: f64,

    // ── Disruption objective ─────────────────────────────────────────
    /// `linear`, `sqrt`, `log`, `exp:<lambda>` or `threshold:<cutoff>`.
    #[envconfig(from = "DRIFT_MOVEMENT_PENALTY", default = "linear")]
    pub movement_penalty: MovementPenalty,
    #[envconfig(from = "DRIFT_DISRUPTION_MOVEMENT_WEIGHT", default = "0.70")]
    pub disruption_movement_weight: f64,
    #[envconfig(from = "DRIFT_DISRUPTION_COLD_START_WEIGHT", default = "0.10")]
    pub disruption_cold_start_weight: f64,
    #[envconfig(from = "DRIFT_DISRUPTION_TIME_SLOT_WEIGHT", default = "0.20")]
    pub disruption_time_slot_weight: f64,

    // ── Balance objective ────────────────────────────────────────────
    #[envconfig(from = "DRIFT_BALANCE_MAX_STD_DEV", default = "50.0")]
    pub balance_max_std_dev: f64,
    #[envconfig(from = "DRIFT_BALANCE_CPU_WEIGHT", default = "0.5")]
    pub balance_cpu_weight: f64,
    #[envconfig(from = "DRIFT_BALANCE_MEM_WEIGHT", default = "0.5")]
    pub balance_mem_weight: f64,

    // ── Cycle & artifact ─────────────────────────────────────────────
    /// Seconds between rebalance cycles. 0 runs a single cycle and exits.
    #[envconfig(from = "DRIFT_INTERVAL_SECONDS", default = "300")]
    pub interval_seconds: u64,
    #[envconfig(from = "DRIFT_HINT_TTL_HOURS", default = "24")]
    pub hint_ttl_hours: i64,
    #[envconfig(from = "DRIFT_MAX_PUBLISHED_SOLUTIONS", default = "10")]
    pub max_published_solutions: usize,
    #[envconfig(from = "DRIFT_RESERVATION_MAX_RETRIES", default = "5")]
    pub reservation_max_retries: u32,
    #[envconfig(from = "DRIFT_RESERVATION_BACKOFF_MS", default = "10")]
    pub reservation_backoff_ms: u64,
}

impl Settings {
    pub fn engine(&self) -> Nsga2Config {
        Nsga2Config {
            population_size: self.population_size,
            max_generations: self.max_generations,
            crossover_probability: self.crossover_probability,
            mutation_probability: self.mutation_probability,
            tournament_size: self.tournament_size,
            parallel_evaluation: self.parallel_evaluation,
            seed_fraction: self.seed_fraction,
        }
    }

    /// Weights applied to `(cost, disruption, balance)` when ranking the
    /// final front.
    pub fn ranking_weights(&self) -> [f64; 3] {
        [self.weight_cost, self.weight_disruption, self.weight_balance]
    }

    pub fn disruption_weights(&self) -> DisruptionWeights {
        DisruptionWeights {
            movement: self.disruption_movement_weight,
            cold_start: self.disruption_cold_start_weight,
            time_slots: self.disruption_time_slot_weight,
        }
    }

    pub fn balance(&self) -> BalanceConfig {
        BalanceConfig {
            max_std_dev: self.balance_max_std_dev,
            cpu_weight: self.balance_cpu_weight,
            mem_weight: self.balance_mem_weight,
        }
    }

    pub fn reservation(&self) -> ReservationConfig {
        ReservationConfig {
            max_retries: self.reservation_max_retries,
            base_backoff: Duration::from_millis(self.reservation_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_from_empty_environment() {
        let s = Settings::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(s.population_size, 100);
        assert_eq!(s.max_generations, 50);
        assert_eq!(s.movement_penalty, MovementPenalty::Linear);
        assert_eq!(s.ranking_weights(), [0.5, 0.3, 0.2]);
        assert_eq!(s.interval_seconds, 300);
        assert_eq!(s.hint_ttl_hours, 24);
        assert!(s.parallel_evaluation);
        assert!(s.warm_start);
        assert_eq!(s.reservation().max_retries, 5);
        assert_eq!(s.reservation().base_backoff, Duration::from_millis(10));
    }

    #[test]
    fn overrides_parse() {
        let mut env = HashMap::new();
        env.insert("DRIFT_POPULATION_SIZE".into(), "40".into());
        env.insert("DRIFT_MOVEMENT_PENALTY".into(), "exp:2.0".into());
        env.insert("DRIFT_PARALLEL_EVALUATION".into(), "false".into());
        env.insert("DRIFT_RESERVATION_MAX_RETRIES".into(), "20".into());
        env.insert("DRIFT_RESERVATION_BACKOFF_MS".into(), "50".into());
        let s = Settings::init_from_hashmap(&env).unwrap();
        assert_eq!(s.population_size, 40);
        assert_eq!(s.movement_penalty, MovementPenalty::Exp(2.0));
        assert!(!s.parallel_evaluation);
        let reservation = s.reservation();
        assert_eq!(reservation.max_retries, 20);
        assert_eq!(reservation.base_backoff, Duration::from_millis(50));
    }

    #[test]
    fn bad_penalty_is_rejected() {
        let mut env = HashMap::new();
        env.insert("DRIFT_MOVEMENT_PENALTY".into(), "cubic".into());
        assert!(Settings::init_from_hashmap(&env).is_err());
    }
}
