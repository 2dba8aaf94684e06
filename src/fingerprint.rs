use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::model::ClusterSnapshot;

/// Digest identifying a cluster shape for seeding purposes: sorted node
/// names and sorted per-replica-set pod counts, nothing else. Two
/// clusters differing only in where pods sit share a fingerprint.
pub fn cluster_fingerprint(snapshot: &ClusterSnapshot) -> String {
    let mut names: Vec<&str> = snapshot.nodes.iter().map(|n| n.name.as_str()).collect();
    names.sort_unstable();
    let counts: BTreeMap<String, usize> = snapshot
        .replica_sets()
        .into_iter()
        .map(|(k, v)| (k, v.size()))
        .collect();
    fingerprint_of(&names, counts.iter().map(|(k, &c)| (k.as_str(), c)))
}

/// Fingerprint over already-sorted node names and `rs_key -> count` pairs.
pub fn fingerprint_of<'a>(
    sorted_node_names: &[&str],
    sorted_rs_counts: impl Iterator<Item = (&'a str, usize)>,
) -> String {
    let rs: Vec<String> = sorted_rs_counts
        .map(|(key, count)| format!("{key}={count}"))
        .collect();
    let payload = format!(
        "nodes:{}|replicasets:{}",
        sorted_node_names.join(","),
        rs.join(",")
    );
    let digest = Sha256::digest(payload.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Per-replica-set count differences between a prior run and now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodDelta {
    pub added_rs: Vec<String>,
    pub removed_rs: Vec<String>,
    pub scaled_up: Vec<String>,
    pub scaled_down: Vec<String>,
}

impl PodDelta {
    pub fn is_empty(&self) -> bool {
        self.added_rs.is_empty()
            && self.removed_rs.is_empty()
            && self.scaled_up.is_empty()
            && self.scaled_down.is_empty()
    }
}

/// Whether a prior hint's solutions may seed the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedDecision {
    /// Fingerprints match; seed directly.
    ExactMatch,
    /// The node-name set changed; node indices are meaningless now.
    NodesChanged,
    /// Replica-set counts changed.
    PodsChanged(PodDelta),
    /// Fingerprints differ but nodes and counts are identical; solutions
    /// remain usable after a node-name remap.
    ReusableNoChanges,
}

impl SeedDecision {
    pub fn allows_seeding(&self) -> bool {
        matches!(self, Self::ExactMatch | Self::ReusableNoChanges)
    }
}

/// Compare a prior hint's recorded cluster shape with the current
/// snapshot. `prior_rs_counts` is the synthetic pod set reconstructed
/// from the hint's original replica-set distribution.
pub fn seed_decision(
    prior_fingerprint: &str,
    prior_nodes: &[String],
    prior_rs_counts: &BTreeMap<String, usize>,
    snapshot: &ClusterSnapshot,
) -> SeedDecision {
    if prior_fingerprint == cluster_fingerprint(snapshot) {
        return SeedDecision::ExactMatch;
    }

    let prior_set: BTreeSet<&str> = prior_nodes.iter().map(|s| s.as_str()).collect();
    let current_set: BTreeSet<&str> = snapshot.nodes.iter().map(|n| n.name.as_str()).collect();
    if prior_set != current_set {
        return SeedDecision::NodesChanged;
    }

    let current_counts: BTreeMap<String, usize> = snapshot
        .replica_sets()
        .into_iter()
        .map(|(k, v)| (k, v.size()))
        .collect();

    let mut delta = PodDelta::default();
    for (key, &prior) in prior_rs_counts {
        match current_counts.get(key) {
            None => delta.removed_rs.push(key.clone()),
            Some(&now) if now > prior => delta.scaled_up.push(key.clone()),
            Some(&now) if now < prior => delta.scaled_down.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in current_counts.keys() {
        if !prior_rs_counts.contains_key(key) {
            delta.added_rs.push(key.clone());
        }
    }

    if delta.is_empty() {
        SeedDecision::ReusableNoChanges
    } else {
        SeedDecision::PodsChanged(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Lifecycle, NodeRecord, PodRecord};

    fn node(name: &str) -> NodeRecord {
        NodeRecord {
            name: name.into(),
            cpu_millis: 4000,
            mem_bytes: 8 << 30,
            region: "eu".into(),
            instance_type: "m5.xlarge".into(),
            lifecycle: Lifecycle::OnDemand,
            cost_per_vcpu: 0.024,
            cost_per_gib: 0.006,
            hourly_cost: 0.192,
        }
    }

    fn pod(name: &str, rs: &str, node_index: usize) -> PodRecord {
        PodRecord {
            namespace: "default".into(),
            name: name.into(),
            cpu_millis: 500,
            mem_bytes: 1 << 30,
            replica_set: rs.into(),
            max_unavailable: 1,
            cold_start_seconds: 0.0,
            node_index,
        }
    }

    fn snapshot(placement: &[(&str, usize)]) -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: vec![node("n1"), node("n2")],
            pods: placement
                .iter()
                .enumerate()
                .map(|(i, &(rs, ni))| pod(&format!("{rs}-{i}"), rs, ni))
                .collect(),
        }
    }

    #[test]
    fn fingerprint_ignores_pod_distribution() {
        let a = snapshot(&[("web", 0), ("web", 0), ("api", 1)]);
        let b = snapshot(&[("web", 1), ("web", 0), ("api", 0)]);
        assert_eq!(cluster_fingerprint(&a), cluster_fingerprint(&b));
    }

    #[test]
    fn fingerprint_changes_with_replica_count() {
        let a = snapshot(&[("web", 0), ("api", 1)]);
        let b = snapshot(&[("web", 0), ("web", 0), ("api", 1)]);
        assert_ne!(cluster_fingerprint(&a), cluster_fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_sixteen_hex_chars() {
        let fp = cluster_fingerprint(&snapshot(&[("web", 0)]));
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn exact_match_seeds_directly() {
        let snap = snapshot(&[("web", 0), ("api", 1)]);
        let fp = cluster_fingerprint(&snap);
        let decision = seed_decision(&fp, &["n1".into(), "n2".into()], &BTreeMap::new(), &snap);
        assert_eq!(decision, SeedDecision::ExactMatch);
        assert!(decision.allows_seeding());
    }

    #[test]
    fn node_change_discards() {
        let snap = snapshot(&[("web", 0)]);
        let decision = seed_decision(
            "0000000000000000",
            &["n1".into(), "gone".into()],
            &BTreeMap::new(),
            &snap,
        );
        assert_eq!(decision, SeedDecision::NodesChanged);
        assert!(!decision.allows_seeding());
    }

    #[test]
    fn scaled_replica_set_discards_with_delta() {
        let snap = snapshot(&[("web", 0), ("web", 0), ("api", 1)]);
        let prior = BTreeMap::from([("default/web".to_string(), 1), ("default/api".to_string(), 1)]);
        let decision = seed_decision("0000000000000000", &["n1".into(), "n2".into()], &prior, &snap);
        match decision {
            SeedDecision::PodsChanged(delta) => {
                assert_eq!(delta.scaled_up, vec!["default/web".to_string()]);
                assert!(delta.scaled_down.is_empty());
            }
            other => panic!("expected PodsChanged, got {other:?}"),
        }
    }

    #[test]
    fn added_and_removed_sets_are_reported() {
        let snap = snapshot(&[("web", 0)]);
        let prior = BTreeMap::from([("default/old".to_string(), 2)]);
        let decision = seed_decision("0000000000000000", &["n1".into(), "n2".into()], &prior, &snap);
        match decision {
            SeedDecision::PodsChanged(delta) => {
                assert_eq!(delta.added_rs, vec!["default/web".to_string()]);
                assert_eq!(delta.removed_rs, vec!["default/old".to_string()]);
            }
            other => panic!("expected PodsChanged, got {other:?}"),
        }
    }

    #[test]
    fn identical_shape_under_stale_fingerprint_is_reusable() {
        let snap = snapshot(&[("web", 0), ("api", 1)]);
        let prior = BTreeMap::from([("default/web".to_string(), 1), ("default/api".to_string(), 1)]);
        let decision = seed_decision("0000000000000000", &["n1".into(), "n2".into()], &prior, &snap);
        assert_eq!(decision, SeedDecision::ReusableNoChanges);
    }
}
