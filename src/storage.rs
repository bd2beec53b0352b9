use ahash::AHashMap as HashMap;
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;

use crate::arrow_utils::batch_to_record;
use crate::errors::StoreResult;
use crate::model::{Record, RecordKey};

/// Represents a single row change to be persisted as part of a committed transaction.
///
/// The claim model is append/claim-only, so the only mutation is an upsert of the
/// row's newest version, encoded with [`crate::arrow_utils::row_schema`].
#[derive(Debug, Clone)]
pub enum StorageMutation {
    /// Insert or replace the row stored under the key.
    Upsert(RecordKey, RecordBatch),
}

/// Trait for the durable sink behind a [`crate::store::memory::MemStore`].
///
/// The store hands every commit's mutations to `apply_mutations` before the commit
/// becomes visible. Implementations must apply the whole list or nothing; an error
/// aborts the commit.
///
/// Implementations must be `Send` and `Sync` to be used concurrently by multiple
/// transactions.
pub trait Storage: Send + Sync {
    /// Atomically applies the given mutations.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the mutations could not be persisted. The store
    /// surfaces it to the committing caller as an infrastructure fault.
    fn apply_mutations(&self, mutations: Vec<StorageMutation>) -> StoreResult<()>;
}

/// An in-memory `Storage` keeping the latest batch per key.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<RecordKey, RecordBatch>>,
    batches_applied: Mutex<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RecordKey) -> Option<RecordBatch> {
        self.data.lock().get(key).cloned()
    }

    /// Decodes the persisted row under `key`.
    pub fn record(&self, key: &RecordKey) -> StoreResult<Option<(Record, u64)>> {
        self.get(key)
            .map(|batch| batch_to_record(&batch).map(|(_, record, version)| (record, version)))
            .transpose()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Number of successful `apply_mutations` calls, one per committed write set.
    pub fn batches_applied(&self) -> u64 {
        *self.batches_applied.lock()
    }
}

impl Storage for MemoryStorage {
    fn apply_mutations(&self, mutations: Vec<StorageMutation>) -> StoreResult<()> {
        let mut data = self.data.lock();
        for mutation in mutations {
            match mutation {
                StorageMutation::Upsert(key, record_batch) => {
                    data.insert(key, record_batch);
                }
            }
        }
        *self.batches_applied.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow_utils::record_to_batch;
    use crate::model::{Claim, Table};

    #[test]
    fn keeps_latest_batch_per_key() {
        let storage = MemoryStorage::new();
        let key = RecordKey::claim(Table::Claims, 1);
        let first = Record::Claim(Claim { id: 1, slot_id: 10 });
        let second = Record::Claim(Claim { id: 1, slot_id: 11 });

        storage
            .apply_mutations(vec![StorageMutation::Upsert(
                key.clone(),
                record_to_batch(&key, &first, 1).unwrap(),
            )])
            .unwrap();
        storage
            .apply_mutations(vec![StorageMutation::Upsert(
                key.clone(),
                record_to_batch(&key, &second, 2).unwrap(),
            )])
            .unwrap();

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.batches_applied(), 2);
        assert_eq!(storage.record(&key).unwrap(), Some((second, 2)));
    }
}
