use serde::{Deserialize, Serialize};

/// Defines the isolation levels a resource store must accept when a transaction is opened.
///
/// The level decides which anomalies the store lets through. The claim protocols in this crate
/// are correct or incorrect *because* of the chosen level, so the mapping from level to
/// commit-time validation is the heart of the conformance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// **Unspecified:**
    ///
    /// No explicit transaction was requested. Reads observe the latest committed value at the
    /// moment of the read and the commit performs no read validation. This is the weakest level
    /// and admits lost updates.
    Unspecified,
    /// **Read Uncommitted:**
    ///
    /// The SQL standard permits dirty reads at this level but does not require them. Uncommitted
    /// rows are never exposed, so this level behaves like [IsolationLevel::ReadCommitted].
    ReadUncommitted,
    /// **Read Committed:**
    ///
    /// Any data read is committed at the moment it is read. Two reads of the same row may return
    /// different values, and the read-then-write window is not protected against concurrent
    /// writers.
    ReadCommitted,
    /// **Snapshot:**
    ///
    /// All reads see the database as of transaction start. At commit, a row written by this
    /// transaction that was also written by a transaction committed after our snapshot aborts
    /// the commit (first committer wins). Absence of rows is not protected, so write skew over
    /// a predicate is still possible.
    Snapshot,
    /// **Repeatable Read:**
    ///
    /// Snapshot reads plus validation of every row read by key: if a row read by this
    /// transaction changed before commit, the commit aborts. Predicate reads are not protected
    /// and phantoms are possible.
    RepeatableRead,
    /// **Serializable:**
    ///
    /// Repeatable read plus predicate validation. A key range scanned by this transaction that
    /// gained or changed a row after the snapshot aborts the commit, which closes the phantom
    /// that makes check-then-insert unsafe at every weaker level.
    Serializable,
}

impl IsolationLevel {
    /// Every level, weakest first.
    pub const ALL: [IsolationLevel; 6] = [
        IsolationLevel::Unspecified,
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::Snapshot,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Whether reads are served from the snapshot taken at transaction start.
    pub fn reads_snapshot(self) -> bool {
        matches!(
            self,
            IsolationLevel::Snapshot | IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }

    /// Whether a concurrent committed write to a row in our write set aborts the commit.
    pub fn validates_writes(self) -> bool {
        self.reads_snapshot()
    }

    /// Whether rows read by key are re-validated at commit.
    pub fn validates_point_reads(self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }

    /// Whether scanned key ranges are re-validated at commit.
    pub fn validates_predicates(self) -> bool {
        self == IsolationLevel::Serializable
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IsolationLevel::Unspecified => "unspecified",
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::Snapshot => "snapshot",
            IsolationLevel::RepeatableRead => "repeatable-read",
            IsolationLevel::Serializable => "serializable",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_strengthens_monotonically() {
        let strengths: Vec<u8> = IsolationLevel::ALL
            .iter()
            .map(|level| {
                level.validates_writes() as u8
                    + level.validates_point_reads() as u8
                    + level.validates_predicates() as u8
            })
            .collect();
        assert!(strengths.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(strengths, vec![0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn only_serializable_guards_predicates() {
        for level in IsolationLevel::ALL {
            assert_eq!(
                level.validates_predicates(),
                level == IsolationLevel::Serializable
            );
        }
    }
}
