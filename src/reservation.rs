//! Slot reservation against published hints.
//!
//! A downstream scheduler placing one pod calls [`reserve_node`] with the
//! pod's `namespace/replica_set` key. The hint's resourceVersion makes
//! the decrement a compare-and-set: of any number of concurrent callers,
//! at most one write lands per version, so `available_slots` can never be
//! claimed below zero.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::store::{HintStore, StoreError};

#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// Version-conflict retries per hint before giving up on it.
    pub max_retries: u32,
    /// First backoff; doubles per conflict.
    pub base_backoff: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self { max_retries: 5, base_backoff: Duration::from_millis(10) }
    }
}

/// Claim a slot for one pod of `rs_key` from any active hint. Returns the
/// node name the pod should land on, or `None` when every candidate hint
/// is expired, irrelevant or exhausted.
pub async fn reserve_node(
    store: &HintStore,
    rs_key: &str,
    config: &ReservationConfig,
) -> Result<Option<String>, StoreError> {
    let now = Utc::now();
    let mut candidates: Vec<String> = store
        .list()
        .await?
        .into_iter()
        .filter(|h| !h.is_expired(now))
        .filter(|h| {
            h.top_solution()
                .map(|s| s.movements.contains_key(rs_key))
                .unwrap_or(false)
        })
        .filter_map(|h| h.metadata.name)
        .collect();
    candidates.sort();

    for name in candidates {
        match reserve_from_hint(store, &name, rs_key, config).await {
            Ok(Some(node)) => {
                debug!(hint = %name, rs = rs_key, node = %node, "slot reserved");
                return Ok(Some(node));
            }
            Ok(None) => continue,
            Err(error) => {
                // Anything besides a version conflict aborts this hint
                // only; the next candidate may still work.
                warn!(hint = %name, rs = rs_key, %error, "reservation aborted for hint");
                continue;
            }
        }
    }
    Ok(None)
}

async fn reserve_from_hint(
    store: &HintStore,
    name: &str,
    rs_key: &str,
    config: &ReservationConfig,
) -> Result<Option<String>, StoreError> {
    let mut backoff = config.base_backoff;
    for _ in 0..config.max_retries.max(1) {
        let Some(mut hint) = store.get(name).await? else {
            return Ok(None);
        };
        let Some(top_index) = hint
            .spec
            .solutions
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.rank)
            .map(|(i, _)| i)
        else {
            return Ok(None);
        };
        let Some(movement) = hint.spec.solutions[top_index].movements.get_mut(rs_key) else {
            return Ok(None);
        };
        // Any node with room works; first in name order wins.
        let Some(node) = movement
            .available_slots
            .iter()
            .find(|&(_, &slots)| slots > 0)
            .map(|(node, _)| node.clone())
        else {
            return Ok(None);
        };

        if let Some(slots) = movement.available_slots.get_mut(&node) {
            *slots -= 1;
        }
        *movement.scheduled_count.entry(node.clone()).or_insert(0) += 1;

        match store.replace(hint).await {
            Ok(()) => return Ok(Some(node)),
            Err(StoreError::Conflict) => {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(other) => return Err(other),
        }
    }
    Ok(None)
}
