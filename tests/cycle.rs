//! Cycle-level guarantees: the safety gate, publication-before-eviction
//! ordering, cancellation, and cross-cycle seeding.

mod common;

use tokio_util::sync::CancellationToken;

use driftrs::cycle::{CycleError, CycleOutcome, Rebalancer};
use driftrs::orchestrator::{FakeOrchestrator, Orchestrator};
use driftrs::pricing::PriceBook;
use driftrs::store::{FakeHintStore, HintStore};

use common::{disruption_budget, running_pod, settings, unschedulable_pod, worker_node};

fn spot_migration_fake() -> FakeOrchestrator {
    FakeOrchestrator::new()
        .with_nodes(vec![
            worker_node("ond-1", "m5.xlarge", false, "8", "32Gi"),
            worker_node("spt-1", "m5.xlarge", true, "8", "32Gi"),
        ])
        .with_pods(vec![
            running_pod("default", "web-0", "web", "ond-1", "1", "2Gi"),
            running_pod("default", "web-1", "web", "ond-1", "1", "2Gi"),
        ])
        .with_budgets(vec![disruption_budget("default", "web", 2)])
}

fn rebalancer(fake: FakeOrchestrator, store: FakeHintStore) -> Rebalancer {
    Rebalancer {
        orchestrator: Orchestrator::Fake(fake),
        store: HintStore::Fake(store),
        prices: PriceBook::default(),
        settings: settings(&[("DRIFT_WEIGHT_COST", "0.9"), ("DRIFT_WEIGHT_BALANCE", "0.0")]),
    }
}

#[tokio::test]
async fn unschedulable_pods_skip_the_cycle_entirely() {
    let fake = spot_migration_fake();
    {
        let mut pods = vec![unschedulable_pod("default", "stuck-0")];
        pods.extend([
            running_pod("default", "web-0", "web", "ond-1", "1", "2Gi"),
            running_pod("default", "web-1", "web", "ond-1", "1", "2Gi"),
        ]);
        fake.set_pods(pods);
    }
    let store = FakeHintStore::new();
    let rebalancer = rebalancer(fake.clone(), store.clone());

    let outcome = rebalancer.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::SkippedUnstable { unschedulable: 1 }
    ));
    // No hint, no eviction: the skip is total.
    assert!(rebalancer.store.list().await.unwrap().is_empty());
    assert!(fake.evict_calls().is_empty());
    assert!(store.write_log().is_empty());
}

#[tokio::test]
async fn publication_failure_blocks_all_evictions() {
    let fake = spot_migration_fake();
    let store = FakeHintStore::new().fail_next_write("etcd unavailable");
    let rebalancer = rebalancer(fake.clone(), store.clone());

    let result = rebalancer.run_cycle(&CancellationToken::new()).await;
    assert!(matches!(result, Err(CycleError::Publication(_))));
    assert!(fake.evict_calls().is_empty(), "evictions must wait for the hint");
    assert!(store.write_log().is_empty());
}

#[tokio::test]
async fn pre_cancelled_cycle_changes_nothing() {
    let fake = spot_migration_fake();
    let store = FakeHintStore::new();
    let rebalancer = rebalancer(fake.clone(), store.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = rebalancer.run_cycle(&cancel).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Cancelled));
    assert!(store.write_log().is_empty());
    assert!(fake.evict_calls().is_empty());
}

#[tokio::test]
async fn empty_cluster_is_a_quiet_no_op() {
    let fake = FakeOrchestrator::new()
        .with_nodes(vec![worker_node("n1", "m5.xlarge", false, "4", "16Gi")]);
    let store = FakeHintStore::new();
    let rebalancer = rebalancer(fake, store.clone());

    let outcome = rebalancer.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::EmptyCluster));
    assert!(store.write_log().is_empty());
}

#[tokio::test]
async fn missing_node_metadata_aborts_the_cycle() {
    let mut node = worker_node("n1", "m5.xlarge", false, "4", "16Gi");
    node.metadata.labels.as_mut().unwrap().remove("topology.kubernetes.io/region");
    let fake = FakeOrchestrator::new()
        .with_nodes(vec![node])
        .with_pods(vec![running_pod("default", "web-0", "web", "n1", "1", "2Gi")]);
    let store = FakeHintStore::new();
    let rebalancer = rebalancer(fake, store.clone());

    let result = rebalancer.run_cycle(&CancellationToken::new()).await;
    assert!(matches!(result, Err(CycleError::Adapter(_))));
    assert!(store.write_log().is_empty());
}

#[tokio::test]
async fn second_cycle_updates_the_same_hint_in_place() {
    let fake = spot_migration_fake();
    let store = FakeHintStore::new();
    let rebalancer = rebalancer(fake, store.clone());

    let first = rebalancer.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(matches!(first, CycleOutcome::Completed { .. }));
    // Same cluster shape: the second publication is an idempotent
    // overwrite of the same record, seeded from the first run.
    let second = rebalancer.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(matches!(second, CycleOutcome::Completed { .. }));

    let hints = rebalancer.store.list().await.unwrap();
    assert_eq!(hints.len(), 1);
    let log = store.write_log();
    assert_eq!(log.len(), 2);
    assert!(log[0].starts_with("create "));
    assert!(log[1].starts_with("replace "));
    assert_eq!(log[0].strip_prefix("create "), log[1].strip_prefix("replace "));
}
