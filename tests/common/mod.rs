//! Common utilities for seatclaim integration tests.
#![allow(dead_code)]

use seatclaim::{
    errors::{StoreError, StoreResult},
    storage::{MemoryStorage, Storage, StorageMutation},
    ClaimCoordinator, CoordinatorConfig, GroupPopulator, MemStore, RaceWindow, ResourceStore,
    StoreConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Storages ---

/// A sink that accepts the first `healthy_batches` write sets and rejects the rest.
pub struct FlakyStorage {
    inner: MemoryStorage,
    healthy_batches: usize,
    applied: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(healthy_batches: usize) -> Self {
        Self {
            inner: MemoryStorage::new(),
            healthy_batches,
            applied: AtomicUsize::new(0),
        }
    }

    /// Rows persisted so far.
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl Storage for FlakyStorage {
    fn apply_mutations(&self, mutations: Vec<StorageMutation>) -> StoreResult<()> {
        if self.applied.fetch_add(1, Ordering::SeqCst) >= self.healthy_batches {
            return Err(StoreError::Unavailable("sink offline".to_string()));
        }
        self.inner.apply_mutations(mutations)
    }
}

/// A sink that takes `delay` to persist every write set.
pub struct SlowStorage {
    inner: MemoryStorage,
    delay: Duration,
}

impl SlowStorage {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStorage::new(),
            delay,
        }
    }
}

impl Storage for SlowStorage {
    fn apply_mutations(&self, mutations: Vec<StorageMutation>) -> StoreResult<()> {
        std::thread::sleep(self.delay);
        self.inner.apply_mutations(mutations)
    }
}

// --- Helper Functions ---

/// A window wide enough for every caller to read before anyone commits.
pub fn contended_window() -> RaceWindow {
    RaceWindow::between(Duration::from_millis(10), Duration::from_millis(20))
}

pub fn mem_store() -> Arc<MemStore> {
    Arc::new(MemStore::in_memory())
}

pub fn store_with(storage: Arc<dyn Storage>, commit_timeout: Duration) -> Arc<MemStore> {
    Arc::new(MemStore::new(storage, StoreConfig { commit_timeout }))
}

pub fn coordinator(store: Arc<MemStore>, race_window: RaceWindow) -> ClaimCoordinator {
    let store: Arc<dyn ResourceStore> = store;
    ClaimCoordinator::new(store, CoordinatorConfig::default().with_race_window(race_window))
}

pub fn populator(store: Arc<MemStore>, race_window: RaceWindow) -> GroupPopulator {
    let store: Arc<dyn ResourceStore> = store;
    GroupPopulator::new(store, CoordinatorConfig::default().with_race_window(race_window))
}
