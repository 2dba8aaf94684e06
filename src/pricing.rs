use std::collections::HashMap;

use tracing::warn;

use crate::model::Lifecycle;

/// Fallback unit prices applied when an instance type is missing from the
/// book. Cheap enough not to dominate real entries, expensive enough that
/// idle capacity still registers as waste.
pub const FALLBACK_COST_PER_VCPU: f64 = 0.05;
pub const FALLBACK_COST_PER_GIB: f64 = 0.01;

/// Per-resource unit prices for one `(region, instance_type, lifecycle)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    /// $/vCPU-hour.
    pub cost_per_vcpu: f64,
    /// $/GiB-hour.
    pub cost_per_gib: f64,
}

impl PriceQuote {
    /// Whole-node price for a given capacity.
    pub fn hourly_for(&self, cpu_millis: i64, mem_bytes: i64) -> f64 {
        self.cost_per_vcpu * (cpu_millis as f64 / 1000.0)
            + self.cost_per_gib * (mem_bytes as f64 / crate::model::GIB)
    }
}

/// Pure price lookup keyed by `(region, instance_type, lifecycle)`.
///
/// Entries registered under the `"*"` region match any region; an exact
/// region entry wins over the wildcard. The default book carries a small
/// set of common general/compute/memory families.
#[derive(Debug, Clone)]
pub struct PriceBook {
    entries: HashMap<(String, String, Lifecycle), PriceQuote>,
}

/// Discount applied to on-demand unit prices for spot entries in the
/// default book. Tracks typical fleet-average spot pricing.
const SPOT_FACTOR: f64 = 0.357;

impl Default for PriceBook {
    fn default() -> Self {
        let mut book = Self::empty();
        //        family            $/vCPU-h  $/GiB-h
        for (family, vcpu, gib) in [
            // General purpose
            ("m5", 0.024, 0.006),
            ("m6i", 0.0235, 0.0059),
            ("m7i", 0.0248, 0.0062),
            // Compute optimized
            ("c5", 0.0283, 0.0071),
            ("c6i", 0.0278, 0.0070),
            // Memory optimized
            ("r5", 0.021, 0.00525),
            ("r6i", 0.0206, 0.0052),
            // Burstable
            ("t3", 0.0166, 0.0042),
        ] {
            for size in ["large", "xlarge", "2xlarge", "4xlarge", "8xlarge"] {
                let instance_type = format!("{family}.{size}");
                book.insert(
                    "*",
                    &instance_type,
                    Lifecycle::OnDemand,
                    PriceQuote { cost_per_vcpu: vcpu, cost_per_gib: gib },
                );
                book.insert(
                    "*",
                    &instance_type,
                    Lifecycle::Spot,
                    PriceQuote {
                        cost_per_vcpu: vcpu * SPOT_FACTOR,
                        cost_per_gib: gib * SPOT_FACTOR,
                    },
                );
            }
        }
        book
    }
}

impl PriceBook {
    pub fn empty() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn insert(
        &mut self,
        region: &str,
        instance_type: &str,
        lifecycle: Lifecycle,
        quote: PriceQuote,
    ) {
        self.entries
            .insert((region.into(), instance_type.into(), lifecycle), quote);
    }

    /// Exact-region entry first, then the `"*"` wildcard.
    pub fn quote(
        &self,
        region: &str,
        instance_type: &str,
        lifecycle: Lifecycle,
    ) -> Option<PriceQuote> {
        self.entries
            .get(&(region.into(), instance_type.into(), lifecycle))
            .or_else(|| self.entries.get(&("*".into(), instance_type.into(), lifecycle)))
            .copied()
    }

    /// Like [`quote`](Self::quote) but never fails: unknown instance types
    /// fall back to flat unit prices and log once per lookup.
    pub fn quote_or_fallback(
        &self,
        region: &str,
        instance_type: &str,
        lifecycle: Lifecycle,
    ) -> PriceQuote {
        match self.quote(region, instance_type, lifecycle) {
            Some(q) => q,
            None => {
                warn!(
                    region,
                    instance_type,
                    %lifecycle,
                    cost_per_vcpu = FALLBACK_COST_PER_VCPU,
                    cost_per_gib = FALLBACK_COST_PER_GIB,
                    "no price entry, using fallback"
                );
                PriceQuote {
                    cost_per_vcpu: FALLBACK_COST_PER_VCPU,
                    cost_per_gib: FALLBACK_COST_PER_GIB,
                }
            }
        }
    }
}
