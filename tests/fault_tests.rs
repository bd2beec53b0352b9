mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{coordinator, mem_store, populator, store_with, FlakyStorage, SlowStorage};
use seatclaim::{
    ClaimError, ClaimStrategy, ConformanceHarness, HarnessConfig, HarnessError, IsolationLevel,
    RaceWindow, ResourceStore, SeedPlan, Seeder,
};

#[test]
fn test_sink_failure_leaves_nothing_visible() {
    // The seed commit is the only one the sink accepts.
    let storage = Arc::new(FlakyStorage::new(1));
    let store = store_with(storage.clone(), Duration::from_secs(5));
    let seeded = Seeder::new(store.clone()).seed_single("G").unwrap();
    let persisted = storage.len();
    let coordinator = coordinator(store.clone(), RaceWindow::none());

    let err = coordinator
        .claim_slot(seeded.group_id, 0, 0, IsolationLevel::Serializable)
        .unwrap_err();
    assert!(matches!(err, ClaimError::StoreUnavailable(_)));
    assert!(!err.is_lost_race());

    assert!(coordinator.slot(seeded.group_id, 0, 0).unwrap().unwrap().is_free());
    assert!(coordinator.claims_on(seeded.group_id, 0, 0).unwrap().is_empty());
    assert_eq!(storage.len(), persisted);
    assert_eq!(store.active_transactions(), Some(0));
}

#[test]
fn test_commit_lock_timeout_is_store_unavailable() {
    let store = store_with(
        Arc::new(SlowStorage::new(Duration::from_millis(300))),
        Duration::from_millis(20),
    );
    let seeded = Seeder::new(store.clone())
        .seed(&SeedPlan {
            name: "G".to_string(),
            rows: 1,
            columns: 2,
        })
        .unwrap();
    let coordinator = Arc::new(coordinator(store, RaceWindow::none()));
    let barrier = Arc::new(Barrier::new(2));

    // Different slots: nothing to conflict on, only the commit lock is contended.
    let handles: Vec<_> = (0..2)
        .map(|column| {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                coordinator.claim_slot(seeded.group_id, 0, column, IsolationLevel::ReadCommitted)
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1, "{:?}", outcomes);
    assert!(
        outcomes
            .iter()
            .any(|o| matches!(o, Err(ClaimError::StoreUnavailable(_))))
    );
}

#[test]
fn test_harness_reports_faults() {
    // Seeding the first run is accepted, every claim after it is rejected by the sink.
    let store = store_with(Arc::new(FlakyStorage::new(1)), Duration::from_secs(5));
    let coordinator = coordinator(store, RaceWindow::none());
    let harness = ConformanceHarness::new(HarnessConfig {
        callers: 4,
        max_runs: 2,
    });

    let err = harness
        .verify_claims(
            &coordinator,
            ClaimStrategy::Pessimistic(IsolationLevel::Serializable),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Fault(ClaimError::StoreUnavailable(_))
    ));
}

#[test]
fn test_harness_reports_leaked_transactions() {
    let store = mem_store();
    let coordinator = coordinator(store.clone(), RaceWindow::none());
    let harness = ConformanceHarness::new(HarnessConfig {
        callers: 2,
        max_runs: 1,
    });

    let _held = store.begin(IsolationLevel::Snapshot).unwrap();
    let err = harness
        .verify_claims(&coordinator, ClaimStrategy::Versioned(IsolationLevel::ReadCommitted))
        .unwrap_err();
    assert_eq!(err, HarnessError::LeakedTransactions(1));
}

#[test]
fn test_harness_races_at_least_two_callers() {
    let store = mem_store();
    let populator = populator(store, RaceWindow::none());
    let harness = ConformanceHarness::new(HarnessConfig {
        callers: 1,
        max_runs: 2,
    });
    assert_eq!(harness.config().callers, 1);

    let result = harness.verify_population(
        &populator,
        seatclaim::PopulateStrategy::Transactional(IsolationLevel::Serializable),
    );
    // Clamped to two callers, which Serializable still keeps to one winner.
    let verdict = result.unwrap();
    assert!(
        verdict
            .runs
            .iter()
            .all(|run| run.winners == 1 && run.losers() == 1)
    );
}
