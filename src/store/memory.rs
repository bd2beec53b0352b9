use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::arrow_utils::record_to_batch;
use crate::config::StoreConfig;
use crate::conflict::detection::{ValidationInput, detect_conflicts};
use crate::data_store::txn_buffer::TxnBuffer;
use crate::data_store::versioned_value::VersionedValue;
use crate::errors::{StoreError, StoreResult};
use crate::isolation::IsolationLevel;
use crate::model::{Record, RecordKey, StoredRecord, VersionToken};
use crate::storage::{MemoryStorage, Storage, StorageMutation};
use crate::store::{ResourceStore, Scope, StoreTransaction};
use crate::tracking::{TrackerStats, TxnTracker};

/// State shared by a store and every transaction it hands out.
struct StoreInner {
    /// Every committed version of every row.
    txn_buffer: TxnBuffer,
    /// Timestamp of the newest fully installed commit. Readers never look past it.
    clock: AtomicU64,
    /// A globally increasing counter for generating unique transaction IDs.
    transaction_counter: AtomicU64,
    /// Row identity sequence.
    id_counter: AtomicI64,
    /// Serialises validation and installation of write sets.
    commit_lock: Mutex<()>,
    /// The storage implementation for persisting committed data.
    storage: Arc<dyn Storage>,
    tracker: TxnTracker,
    config: StoreConfig,
}

/// Point-in-time view of a store's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub transactions: TrackerStats,
    /// Distinct rows ever written.
    pub rows: usize,
    /// Versions still held across all rows.
    pub versions: usize,
    /// Timestamp of the newest commit.
    pub last_commit: u64,
    /// Oldest snapshot still held by an active snapshot reader.
    pub oldest_active_snapshot: Option<u64>,
}

/// An in-memory multi-version [`ResourceStore`].
///
/// Snapshot-reading levels read the versions committed at or before their begin
/// timestamp; the weaker levels read the newest committed version at the time of
/// each read. All commit-time checks run under one commit lock, so a commit's rows
/// are validated, persisted to the [`Storage`] sink and installed as one atomic step.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<StoreInner>,
}

impl MemStore {
    /// Creates a store persisting commits into `storage`.
    pub fn new(storage: Arc<dyn Storage>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                txn_buffer: TxnBuffer::new(),
                clock: AtomicU64::new(0),
                transaction_counter: AtomicU64::new(0),
                id_counter: AtomicI64::new(0),
                commit_lock: Mutex::new(()),
                storage,
                tracker: TxnTracker::new(),
                config,
            }),
        }
    }

    /// Creates a store backed by a fresh [`MemoryStorage`] and default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), StoreConfig::default())
    }

    /// Opens a transaction with its concrete type, for callers that hold a `MemStore`.
    pub fn start_transaction(&self, isolation: IsolationLevel) -> MemTransaction {
        let id = self.inner.transaction_counter.fetch_add(1, Ordering::SeqCst);
        MemTransaction::new(id, isolation, Arc::clone(&self.inner))
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            transactions: self.inner.tracker.stats(),
            rows: self.inner.txn_buffer.len(),
            versions: self.inner.txn_buffer.version_count(),
            last_commit: self.inner.clock.load(Ordering::Acquire),
            oldest_active_snapshot: self.inner.tracker.oldest_active_snapshot(),
        }
    }
}

impl ResourceStore for MemStore {
    fn begin(&self, isolation: IsolationLevel) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(self.start_transaction(isolation)))
    }

    fn next_id(&self) -> i64 {
        self.inner.id_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn active_transactions(&self) -> Option<usize> {
        Some(self.inner.tracker.active_count())
    }
}

/// A transaction on a [`MemStore`].
///
/// Reads are served from the shared buffer at the timestamp the isolation level
/// dictates; writes are staged locally until [`StoreTransaction::commit`].
pub struct MemTransaction {
    /// Unique identifier for the transaction.
    id: u64,
    isolation_level: IsolationLevel,
    /// Commit timestamp visible when the transaction began.
    snapshot_ts: u64,
    inner: Arc<StoreInner>,
    /// Rows read by key and the version seen, for read validation.
    read_set: HashMap<RecordKey, u64>,
    /// Scanned key prefixes, for predicate validation.
    predicate_reads: HashSet<String>,
    /// Staged rows.
    write_set: HashMap<RecordKey, Record>,
    /// Version-token preconditions of conditional writes.
    expected_versions: HashMap<RecordKey, u64>,
    finished: bool,
}

impl MemTransaction {
    fn new(id: u64, isolation_level: IsolationLevel, inner: Arc<StoreInner>) -> Self {
        let snapshot_ts = inner
            .tracker
            .register_txn_at(id, isolation_level, || inner.clock.load(Ordering::Acquire));
        Self {
            id,
            isolation_level,
            snapshot_ts,
            inner,
            read_set: HashMap::new(),
            predicate_reads: HashSet::new(),
            write_set: HashMap::new(),
            expected_versions: HashMap::new(),
            finished: false,
        }
    }

    fn read_ts(&self) -> u64 {
        if self.isolation_level.reads_snapshot() {
            self.snapshot_ts
        } else {
            self.inner.clock.load(Ordering::Acquire)
        }
    }

    fn record_point_read(&mut self, key: &RecordKey, version: u64) {
        if self.isolation_level.validates_point_reads() {
            // The first read fixes the version validated at commit.
            self.read_set.entry(key.clone()).or_insert(version);
        }
    }

    fn abort(&mut self, reason: &str) {
        self.finished = true;
        self.inner.tracker.mark_aborted(self.id);
        debug!("Transaction {} aborted: {}", self.id, reason);
    }

    fn install(&mut self, guard_ts: u64) -> StoreResult<VersionToken> {
        let write_set = std::mem::take(&mut self.write_set);
        if write_set.is_empty() {
            return Ok(VersionToken(guard_ts));
        }
        let commit_ts = guard_ts + 1;

        let mut mutations = Vec::with_capacity(write_set.len());
        for (key, record) in &write_set {
            mutations.push(StorageMutation::Upsert(
                key.clone(),
                record_to_batch(key, record, commit_ts)?,
            ));
        }
        self.inner.storage.apply_mutations(mutations)?;

        let horizon = self.inner.tracker.gc_horizon(guard_ts);
        let mut pruned = 0;
        for (key, record) in write_set {
            pruned += self.inner.txn_buffer.prune(&key, horizon);
            self.inner
                .txn_buffer
                .install(key, VersionedValue::new(Arc::new(record), commit_ts));
        }
        if pruned > 0 {
            debug!("Pruned {} version(s) below {}", pruned, horizon);
        }
        // Publish only after every row is installed.
        self.inner.clock.store(commit_ts, Ordering::Release);
        Ok(VersionToken(commit_ts))
    }
}

impl StoreTransaction for MemTransaction {
    fn id(&self) -> u64 {
        self.id
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation_level
    }

    fn find_all(
        &mut self,
        scope: &Scope,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StoreResult<Vec<StoredRecord>> {
        let read_ts = self.read_ts();

        let mut rows: Vec<StoredRecord> = match scope {
            Scope::Key(key) => {
                let committed = self.inner.txn_buffer.get_at(key, read_ts);
                self.record_point_read(key, committed.as_ref().map_or(0, |v| v.version()));
                committed
                    .map(|value| StoredRecord {
                        key: key.clone(),
                        record: value.record().as_ref().clone(),
                        version: value.token(),
                    })
                    .into_iter()
                    .collect()
            }
            Scope::Prefix(prefix) => {
                if self.isolation_level.validates_predicates() {
                    self.predicate_reads.insert(prefix.clone());
                }
                let committed = self.inner.txn_buffer.scan_at(prefix, read_ts);
                let mut rows = Vec::with_capacity(committed.len());
                for (key, value) in committed {
                    self.record_point_read(&key, value.version());
                    rows.push(StoredRecord {
                        key,
                        record: value.record().as_ref().clone(),
                        version: value.token(),
                    });
                }
                rows
            }
        };

        // Overlay the transaction's own staged writes.
        for (key, record) in &self.write_set {
            let in_scope = match scope {
                Scope::Key(scoped) => scoped == key,
                Scope::Prefix(prefix) => key.as_str().starts_with(prefix.as_str()),
            };
            if !in_scope {
                continue;
            }
            match rows.iter_mut().find(|row| &row.key == key) {
                Some(row) => row.record = record.clone(),
                None => rows.push(StoredRecord {
                    key: key.clone(),
                    record: record.clone(),
                    version: VersionToken::ABSENT,
                }),
            }
        }

        rows.retain(|row| predicate(&row.record));
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    fn write(&mut self, rows: Vec<(RecordKey, Record)>) -> StoreResult<()> {
        for (key, record) in rows {
            self.write_set.insert(key, record);
        }
        Ok(())
    }

    fn conditional_write(
        &mut self,
        key: RecordKey,
        record: Record,
        expected: VersionToken,
    ) -> StoreResult<()> {
        self.expected_versions.insert(key.clone(), expected.0);
        self.write_set.insert(key, record);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> StoreResult<VersionToken> {
        let inner = Arc::clone(&self.inner);

        let Some(_guard) = inner.commit_lock.try_lock_for(inner.config.commit_timeout) else {
            self.abort("commit lock timeout");
            return Err(StoreError::Timeout(inner.config.commit_timeout));
        };

        let write_keys: HashSet<RecordKey> = self.write_set.keys().cloned().collect();
        let conflicts = detect_conflicts(
            &ValidationInput {
                txn_id: self.id,
                isolation: self.isolation_level,
                snapshot_ts: self.snapshot_ts,
                read_set: &self.read_set,
                predicate_reads: &self.predicate_reads,
                write_keys: &write_keys,
                expected_versions: &self.expected_versions,
            },
            &inner.txn_buffer,
        );
        if !conflicts.is_empty() {
            self.abort("validation failed");
            return Err(StoreError::Conflict {
                txn_id: self.id,
                conflicts: conflicts.len(),
            });
        }

        let guard_ts = inner.clock.load(Ordering::Acquire);
        match self.install(guard_ts) {
            Ok(token) => {
                self.finished = true;
                inner.tracker.mark_committed(self.id, token.0);
                debug!(
                    "Transaction {} committed {} row(s) at {}",
                    self.id,
                    write_keys.len(),
                    token
                );
                Ok(token)
            }
            Err(err) => {
                self.abort("persisting the write set failed");
                Err(err)
            }
        }
    }

    fn rollback(mut self: Box<Self>) {
        if !self.finished {
            self.abort("rolled back");
        }
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.abort("dropped before commit");
        }
    }
}
