use ahash::AHashMap as HashMap;
use log::debug;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::isolation::IsolationLevel;

/// Lifecycle stage of a transaction known to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Begun and not yet committed or rolled back.
    Active,
    /// Successfully committed.
    Committed,
    /// Rolled back, dropped, or rejected at commit.
    Aborted,
}

/// What the tracker remembers about one transaction.
#[derive(Debug, Clone)]
pub(crate) struct TransactionInfo {
    pub(crate) state: TxnState,
    pub(crate) isolation: IsolationLevel,
    /// Timestamp the transaction's snapshot was taken at.
    pub(crate) snapshot_ts: u64,
    pub(crate) commit_ts: Option<u64>,
    /// The time when this `TransactionInfo` was created, used for garbage collection.
    pub(crate) creation_time: Instant,
}

/// Aggregate counts since the store was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub active: usize,
    pub committed: u64,
    pub aborted: u64,
}

/// Registry of the transactions a store has handed out.
///
/// Every transaction registers on begin and leaves the `Active` state exactly once, on
/// commit, rollback, or drop. A non-zero active count after all callers have returned
/// means some caller leaked a transaction.
pub struct TxnTracker {
    transactions: RwLock<HashMap<u64, TransactionInfo>>,
    committed_total: AtomicU64,
    aborted_total: AtomicU64,
    // Counter for triggering cleanup periodically
    cleanup_counter: AtomicU64,
    cleanup_threshold: u64,
    // Max age for keeping committed/aborted transaction info
    max_txn_age: Duration,
}

impl Default for TxnTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnTracker {
    pub fn new() -> Self {
        Self {
            transactions: RwLock::new(HashMap::new()),
            committed_total: AtomicU64::new(0),
            aborted_total: AtomicU64::new(0),
            cleanup_counter: AtomicU64::new(0),
            cleanup_threshold: 1000,
            max_txn_age: Duration::from_secs(60),
        }
    }

    /// Registers a new transaction as Active.
    pub fn register_txn(&self, txn_id: u64, isolation: IsolationLevel, snapshot_ts: u64) {
        self.register_txn_at(txn_id, isolation, || snapshot_ts);
    }

    /// Registers a new transaction as Active, taking its snapshot while the registry is
    /// locked. A concurrent [`TxnTracker::gc_horizon`] either sees the registration or
    /// runs before the snapshot is taken, so it never prunes a version the new
    /// transaction can read.
    pub fn register_txn_at(
        &self,
        txn_id: u64,
        isolation: IsolationLevel,
        snapshot: impl FnOnce() -> u64,
    ) -> u64 {
        let mut transactions = self.transactions.write();
        let snapshot_ts = snapshot();
        transactions.insert(
            txn_id,
            TransactionInfo {
                state: TxnState::Active,
                isolation,
                snapshot_ts,
                commit_ts: None,
                creation_time: Instant::now(),
            },
        );
        drop(transactions);
        debug!(
            "Registered Tx {} as Active ({}, snapshot {})",
            txn_id, isolation, snapshot_ts
        );
        self.maybe_trigger_cleanup();
        snapshot_ts
    }

    /// Marks a transaction as Committed at `commit_ts`.
    pub fn mark_committed(&self, txn_id: u64, commit_ts: u64) {
        if self.transition(txn_id, TxnState::Committed, Some(commit_ts)) {
            self.committed_total.fetch_add(1, Ordering::Relaxed);
            debug!("Marked Tx {} as Committed (CommitTS: {})", txn_id, commit_ts);
        }
        self.maybe_trigger_cleanup();
    }

    /// Marks a transaction as Aborted.
    pub fn mark_aborted(&self, txn_id: u64) {
        if self.transition(txn_id, TxnState::Aborted, None) {
            self.aborted_total.fetch_add(1, Ordering::Relaxed);
            debug!("Marked Tx {} as Aborted", txn_id);
        }
        self.maybe_trigger_cleanup();
    }

    pub fn state(&self, txn_id: u64) -> Option<TxnState> {
        self.transactions.read().get(&txn_id).map(|info| info.state)
    }

    /// Commit timestamp of a committed transaction still in the registry.
    pub fn commit_ts(&self, txn_id: u64) -> Option<u64> {
        self.transactions
            .read()
            .get(&txn_id)
            .and_then(|info| info.commit_ts)
    }

    pub fn active_count(&self) -> usize {
        self.transactions
            .read()
            .values()
            .filter(|info| info.state == TxnState::Active)
            .count()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            active: self.active_count(),
            committed: self.committed_total.load(Ordering::Relaxed),
            aborted: self.aborted_total.load(Ordering::Relaxed),
        }
    }

    /// Oldest snapshot any active transaction still reads at.
    pub fn oldest_active_snapshot(&self) -> Option<u64> {
        self.transactions
            .read()
            .values()
            .filter(|info| info.state == TxnState::Active && info.isolation.reads_snapshot())
            .map(|info| info.snapshot_ts)
            .min()
    }

    /// Oldest timestamp any active transaction may still read at, capped at `now`.
    ///
    /// Weaker levels read at the clock, which never moves below their begin timestamp,
    /// so every active transaction counts here.
    pub fn gc_horizon(&self, now: u64) -> u64 {
        self.transactions
            .read()
            .values()
            .filter(|info| info.state == TxnState::Active)
            .map(|info| info.snapshot_ts)
            .min()
            .map_or(now, |oldest| oldest.min(now))
    }

    // Only Active transactions may transition; a second transition is ignored.
    fn transition(&self, txn_id: u64, state: TxnState, commit_ts: Option<u64>) -> bool {
        let mut transactions = self.transactions.write();
        match transactions.get_mut(&txn_id) {
            Some(info) if info.state == TxnState::Active => {
                info.state = state;
                info.commit_ts = commit_ts;
                true
            }
            Some(_) => false,
            None => {
                debug!("Warning: Tx {} not found in tracker", txn_id);
                false
            }
        }
    }

    fn maybe_trigger_cleanup(&self) {
        let count = self.cleanup_counter.fetch_add(1, Ordering::Relaxed);
        if count >= self.cleanup_threshold {
            self.cleanup_counter.store(0, Ordering::Relaxed);
            self.cleanup_old_txns();
        }
    }

    /// Removes info for finished transactions older than max_txn_age.
    fn cleanup_old_txns(&self) {
        let now = Instant::now();
        let mut transactions = self.transactions.write();
        let initial_count = transactions.len();
        transactions.retain(|_tx_id, info| {
            info.state == TxnState::Active
                || now.duration_since(info.creation_time) < self.max_txn_age
        });
        let removed_count = initial_count - transactions.len();
        if removed_count > 0 {
            debug!("Cleaned up info for {} old transactions.", removed_count);
        }
    }
}
