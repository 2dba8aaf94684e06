use crate::model::ClusterSnapshot;
use crate::objectives::Objective;

/// Load-imbalance configuration.
#[derive(Debug, Clone, Copy)]
pub struct BalanceConfig {
    /// Divisor for the raw standard deviation. 50 is the theoretical
    /// maximum for values spread over a 0–100 range.
    pub max_std_dev: f64,
    pub cpu_weight: f64,
    pub mem_weight: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self { max_std_dev: 50.0, cpu_weight: 0.5, mem_weight: 0.5 }
    }
}

/// Standard deviation of CPU and memory utilization percentages across
/// nodes hosting at least one pod.
pub struct BalanceObjective {
    config: BalanceConfig,
}

impl BalanceObjective {
    pub fn new(config: BalanceConfig) -> Self {
        Self { config }
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

impl Objective for BalanceObjective {
    fn name(&self) -> &'static str {
        "balance"
    }

    fn evaluate(&self, assignment: &[usize], snapshot: &ClusterSnapshot) -> f64 {
        let usage = snapshot.node_usage(assignment);
        let mut cpu_pct = Vec::new();
        let mut mem_pct = Vec::new();
        for (n, node) in snapshot.nodes.iter().enumerate() {
            let (cpu, mem) = usage[n];
            if cpu == 0 && mem == 0 {
                continue;
            }
            // Utilization may exceed 100 on an overcommitted candidate;
            // zero-capacity nodes read as 0 rather than dividing by zero.
            cpu_pct.push(if node.cpu_millis > 0 {
                100.0 * cpu as f64 / node.cpu_millis as f64
            } else {
                0.0
            });
            mem_pct.push(if node.mem_bytes > 0 {
                100.0 * mem as f64 / node.mem_bytes as f64
            } else {
                0.0
            });
        }
        let max = self.config.max_std_dev.max(f64::EPSILON);
        self.config.cpu_weight * (std_dev(&cpu_pct) / max)
            + self.config.mem_weight * (std_dev(&mem_pct) / max)
    }
}
