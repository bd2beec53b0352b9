//! The resource store surface the claim protocols consume.
//!
//! The coordinator and populator never assume a particular store. Anything that can
//! open transactions at a requested isolation level, read by key or key range, write
//! several rows atomically and check a version token server-side can back them.
//! [`memory::MemStore`] is the in-process implementation.

pub mod memory;

use crate::errors::StoreResult;
use crate::isolation::IsolationLevel;
use crate::model::{Record, RecordKey, StoredRecord, VersionToken};

/// Which rows a read covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// A single row, addressed by key.
    Key(RecordKey),
    /// Every row whose key starts with the prefix. Under Serializable the range itself is
    /// protected, including rows that do not exist yet.
    Prefix(String),
}

/// An open transaction. Dropping it without committing rolls it back.
pub trait StoreTransaction: Send {
    fn id(&self) -> u64;

    fn isolation(&self) -> IsolationLevel;

    /// Rows in `scope` matching `predicate`, in key order. The transaction's own
    /// uncommitted writes are visible to it.
    fn find_all(
        &mut self,
        scope: &Scope,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StoreResult<Vec<StoredRecord>>;

    /// First row in `scope` matching `predicate`, or `None`.
    fn find(
        &mut self,
        scope: &Scope,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StoreResult<Option<StoredRecord>> {
        Ok(self.find_all(scope, predicate)?.into_iter().next())
    }

    /// Whether any row exists in `scope`.
    fn exists(&mut self, scope: &Scope) -> StoreResult<bool> {
        Ok(self.find(scope, &|_| true)?.is_some())
    }

    /// Stages inserts or updates; all rows become visible together at commit.
    fn write(&mut self, rows: Vec<(RecordKey, Record)>) -> StoreResult<()>;

    /// Stages a write that commits only if the row's version token still equals
    /// `expected` at commit time. Enforced at every isolation level.
    fn conditional_write(
        &mut self,
        key: RecordKey,
        record: Record,
        expected: VersionToken,
    ) -> StoreResult<()>;

    /// Validates and applies the staged writes atomically. Returns the commit's version
    /// token, which every written row now carries.
    fn commit(self: Box<Self>) -> StoreResult<VersionToken>;

    /// Discards the staged writes.
    fn rollback(self: Box<Self>);
}

/// A handle on a transactional store.
pub trait ResourceStore: Send + Sync {
    fn begin(&self, isolation: IsolationLevel) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Server-assigned identity for a new row. Never repeats.
    fn next_id(&self) -> i64;

    /// Transactions begun and not yet finished, if the store can tell.
    fn active_transactions(&self) -> Option<usize> {
        None
    }
}
