use std::sync::Arc;

use crate::model::{Record, VersionToken};

/// Represents a record with the commit timestamp that produced it.
///
/// Rows in the store are never overwritten in place. Each commit appends a new
/// `VersionedValue` to the row's chain, and the commit timestamp doubles as the
/// row's version token: any later write to the row yields a strictly larger one.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    /// The committed record.
    record: Arc<Record>,
    /// Commit timestamp of the transaction that wrote this version.
    version: u64,
}

impl VersionedValue {
    /// Creates a new `VersionedValue`.
    ///
    /// # Arguments
    ///
    /// * `record` - The committed record.
    /// * `version` - Commit timestamp of the writing transaction. Must be non-zero; zero is
    ///   reserved for "row absent".
    pub fn new(record: Arc<Record>, version: u64) -> Self {
        debug_assert!(version > 0, "version 0 is reserved for absent rows");
        Self { record, version }
    }

    /// Returns a reference to the record.
    pub fn record(&self) -> &Arc<Record> {
        &self.record
    }

    /// Returns the commit timestamp of this version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the commit timestamp as an opaque token for callers.
    pub fn token(&self) -> VersionToken {
        VersionToken(self.version)
    }
}
