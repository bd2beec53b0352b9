use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::data_store::versioned_value::VersionedValue;
use crate::model::RecordKey;

/// All committed versions of one row, oldest first.
#[derive(Debug, Default)]
pub struct VersionChain {
    versions: RwLock<Vec<VersionedValue>>,
}

impl VersionChain {
    /// Newest version committed at or before `ts`.
    fn visible_at(&self, ts: u64) -> Option<VersionedValue> {
        self.versions
            .read()
            .iter()
            .rev()
            .find(|value| value.version() <= ts)
            .cloned()
    }

    fn newest(&self) -> u64 {
        self.versions.read().last().map_or(0, |value| value.version())
    }

    fn push(&self, value: VersionedValue) {
        self.versions.write().push(value);
    }

    // Keeps the newest version at or before `horizon` and everything after it.
    fn prune(&self, horizon: u64) -> usize {
        let mut versions = self.versions.write();
        let Some(keep_from) = versions.iter().rposition(|value| value.version() <= horizon) else {
            return 0;
        };
        versions.drain(..keep_from).count()
    }

    fn len(&self) -> usize {
        self.versions.read().len()
    }
}

/// The Transaction Buffer (TxnBuffer) implemented using a lock-free SkipMap.
///
/// Holds the committed versions of every row that some reader may still need. Keys are
/// ordered, so a key prefix is a contiguous range and predicate reads are range scans.
/// Rows are never removed; [`TxnBuffer::prune`] trims a row's chain down to what
/// readers at or after a horizon can see.
pub struct TxnBuffer {
    data: SkipMap<RecordKey, Arc<VersionChain>>,
}

impl Default for TxnBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnBuffer {
    /// Creates a new, empty `TxnBuffer`.
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
        }
    }

    /// Retrieves the version of `key` visible to a reader at timestamp `ts`.
    /// Returns `None` if the row did not exist at that time.
    pub fn get_at(&self, key: &RecordKey, ts: u64) -> Option<VersionedValue> {
        self.data
            .get(key)
            .and_then(|entry| entry.value().visible_at(ts))
    }

    /// Commit timestamp of the newest version of `key`, or 0 if the row was never written.
    pub fn latest_version(&self, key: &RecordKey) -> u64 {
        self.data
            .get(key)
            .map_or(0, |entry| entry.value().newest())
    }

    /// Every row under `prefix` visible at `ts`, in key order.
    pub fn scan_at(&self, prefix: &str, ts: u64) -> Vec<(RecordKey, VersionedValue)> {
        self.range(prefix)
            .filter_map(|(key, chain)| chain.visible_at(ts).map(|value| (key, value)))
            .collect()
    }

    /// Keys under `prefix` whose newest version was committed after `ts`.
    pub fn changed_since(&self, prefix: &str, ts: u64) -> Vec<RecordKey> {
        self.range(prefix)
            .filter(|(_, chain)| chain.newest() > ts)
            .map(|(key, _)| key)
            .collect()
    }

    /// Appends a committed version to the row's chain, creating the row if needed.
    pub fn install(&self, key: RecordKey, value: VersionedValue) {
        let entry = self.data.get_or_insert(key, Arc::new(VersionChain::default()));
        entry.value().push(value);
    }

    /// Drops versions of `key` no reader at or after `horizon` can see. Returns how many
    /// were dropped.
    pub fn prune(&self, key: &RecordKey, horizon: u64) -> usize {
        self.data
            .get(key)
            .map_or(0, |entry| entry.value().prune(horizon))
    }

    /// Versions held across all rows.
    pub fn version_count(&self) -> usize {
        self.data.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of distinct rows ever written.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn range<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (RecordKey, Arc<VersionChain>)> + 'a {
        self.data
            .range(RecordKey::from_raw(prefix)..)
            .take_while(move |entry| entry.key().as_str().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}
