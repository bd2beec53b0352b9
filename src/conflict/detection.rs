use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::debug;

use crate::data_store::txn_buffer::TxnBuffer;
use crate::isolation::IsolationLevel;
use crate::model::RecordKey;

/// Represents the type of conflict detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// A row guarded by a version token was rewritten since the token was read.
    StaleVersion,
    /// The transaction wrote a row that another transaction committed after our snapshot.
    WriteWrite,
    /// The transaction read a row by key that changed before our commit.
    ReadWrite,
    /// A key range the transaction scanned gained or changed a row before our commit.
    Phantom,
}

/// One reason a commit must abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub key: String,
    pub kind: ConflictType,
}

/// Everything a transaction observed and intends to change, as seen by validation.
pub struct ValidationInput<'a> {
    pub txn_id: u64,
    pub isolation: IsolationLevel,
    /// Timestamp the transaction's snapshot reads were served at.
    pub snapshot_ts: u64,
    /// Rows read by key and the version seen (0 = absent).
    pub read_set: &'a HashMap<RecordKey, u64>,
    /// Key prefixes scanned by predicate reads.
    pub predicate_reads: &'a HashSet<String>,
    /// Keys the transaction will write.
    pub write_keys: &'a HashSet<RecordKey>,
    /// Rows written under a version-token precondition, with the expected version.
    pub expected_versions: &'a HashMap<RecordKey, u64>,
}

/// Checks a committing transaction against the current buffer state.
///
/// Must run under the store's commit lock so that the buffer cannot change between
/// validation and installation of the write set. Conditional writes are checked at every
/// isolation level; the remaining checks are enabled by the level.
pub fn detect_conflicts(input: &ValidationInput<'_>, txn_buffer: &TxnBuffer) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for (key, expected) in input.expected_versions {
        let current = txn_buffer.latest_version(key);
        if current != *expected {
            debug!(
                "Tx {}: stale version token on '{}' (expected {}, found {})",
                input.txn_id, key, expected, current
            );
            conflicts.push(Conflict {
                key: key.to_string(),
                kind: ConflictType::StaleVersion,
            });
        }
    }

    if input.isolation.validates_writes() {
        // First committer wins.
        for key in input.write_keys {
            if txn_buffer.latest_version(key) > input.snapshot_ts {
                debug!(
                    "Tx {}: write-write conflict on '{}' after snapshot {}",
                    input.txn_id, key, input.snapshot_ts
                );
                conflicts.push(Conflict {
                    key: key.to_string(),
                    kind: ConflictType::WriteWrite,
                });
            }
        }
    }

    if input.isolation.validates_point_reads() {
        for (key, read_version) in input.read_set {
            if txn_buffer.latest_version(key) != *read_version {
                debug!(
                    "Tx {}: row '{}' read at version {} has changed",
                    input.txn_id, key, read_version
                );
                conflicts.push(Conflict {
                    key: key.to_string(),
                    kind: ConflictType::ReadWrite,
                });
            }
        }
    }

    if input.isolation.validates_predicates() {
        for prefix in input.predicate_reads {
            let changed = txn_buffer.changed_since(prefix, input.snapshot_ts);
            if !changed.is_empty() {
                debug!(
                    "Tx {}: {} row(s) appeared or changed under scanned range '{}'",
                    input.txn_id,
                    changed.len(),
                    prefix
                );
                conflicts.push(Conflict {
                    key: prefix.clone(),
                    kind: ConflictType::Phantom,
                });
            }
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_store::versioned_value::VersionedValue;
    use crate::model::{Member, Record};
    use std::sync::Arc;

    fn member(group_key: &str, id: i64) -> Arc<Record> {
        Arc::new(Record::Member(Member {
            id,
            group_key: group_key.to_string(),
            ordinal: 0,
            text: "q".to_string(),
        }))
    }

    struct Sets {
        read_set: HashMap<RecordKey, u64>,
        predicate_reads: HashSet<String>,
        write_keys: HashSet<RecordKey>,
        expected_versions: HashMap<RecordKey, u64>,
    }

    impl Sets {
        fn new() -> Self {
            Self {
                read_set: HashMap::new(),
                predicate_reads: HashSet::new(),
                write_keys: HashSet::new(),
                expected_versions: HashMap::new(),
            }
        }

        fn check(&self, isolation: IsolationLevel, snapshot_ts: u64, buffer: &TxnBuffer) -> Vec<Conflict> {
            detect_conflicts(
                &ValidationInput {
                    txn_id: 1,
                    isolation,
                    snapshot_ts,
                    read_set: &self.read_set,
                    predicate_reads: &self.predicate_reads,
                    write_keys: &self.write_keys,
                    expected_versions: &self.expected_versions,
                },
                buffer,
            )
        }
    }

    #[test]
    fn phantom_only_detected_under_serializable() {
        let buffer = TxnBuffer::new();
        let mut sets = Sets::new();
        sets.predicate_reads.insert(RecordKey::member_prefix("T1"));
        sets.write_keys.insert(RecordKey::member("T1", 10));
        // A concurrent transaction inserted a different member after our snapshot at 1.
        buffer.install(RecordKey::member("T1", 11), VersionedValue::new(member("T1", 11), 2));

        for level in IsolationLevel::ALL {
            let conflicts = sets.check(level, 1, &buffer);
            if level == IsolationLevel::Serializable {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].kind, ConflictType::Phantom);
            } else {
                assert!(conflicts.is_empty(), "{level} should admit the phantom");
            }
        }
    }

    #[test]
    fn stale_tokens_conflict_at_every_level() {
        let buffer = TxnBuffer::new();
        let key = RecordKey::member("T2", 1);
        buffer.install(key.clone(), VersionedValue::new(member("T2", 1), 4));
        let mut sets = Sets::new();
        sets.expected_versions.insert(key, 3);

        for level in IsolationLevel::ALL {
            let conflicts = sets.check(level, 10, &buffer);
            assert!(conflicts.iter().any(|c| c.kind == ConflictType::StaleVersion));
        }
    }

    #[test]
    fn write_write_needs_snapshot_or_stronger() {
        let buffer = TxnBuffer::new();
        let key = RecordKey::member("T3", 1);
        buffer.install(key.clone(), VersionedValue::new(member("T3", 1), 5));
        let mut sets = Sets::new();
        sets.write_keys.insert(key);

        assert!(sets.check(IsolationLevel::ReadCommitted, 4, &buffer).is_empty());
        let conflicts = sets.check(IsolationLevel::Snapshot, 4, &buffer);
        assert_eq!(conflicts[0].kind, ConflictType::WriteWrite);
        assert!(sets.check(IsolationLevel::Snapshot, 5, &buffer).is_empty());
    }
}
