use std::time::Duration;

use thiserror::Error;

use crate::model::SlotAddress;

/// Failures raised by a resource store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Transaction {txn_id} aborted: {conflicts} conflicting row(s)")]
    Conflict { txn_id: u64, conflicts: usize },

    #[error("Store did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record encoding error: {0}")]
    Encoding(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome taxonomy of the claim protocols.
///
/// `NotAvailable`, `Conflict` and `AlreadyExists` are the ordinary ways of losing a race.
/// `StoreUnavailable` is the only infrastructure fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Slot {0} is not available")]
    NotAvailable(SlotAddress),

    #[error("Concurrent write conflict: {0}")]
    Conflict(String),

    #[error("Members for group key '{0}' already exist")]
    AlreadyExists(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ClaimError {
    /// True for every outcome that just means another caller got there first.
    pub fn is_lost_race(&self) -> bool {
        !matches!(self, ClaimError::StoreUnavailable(_))
    }
}

impl From<StoreError> for ClaimError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => ClaimError::Conflict(err.to_string()),
            other => ClaimError::StoreUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaimError>;

/// Why a conformance verification did not pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error("{strategy} violated its expectation: {detail}")]
    Violation { strategy: String, detail: String },

    #[error("Infrastructure fault during a race: {0}")]
    Fault(#[from] ClaimError),

    #[error("{0} transaction(s) still active after a race")]
    LeakedTransactions(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_are_lost_races() {
        let err: ClaimError = StoreError::Conflict {
            txn_id: 7,
            conflicts: 1,
        }
        .into();
        assert!(matches!(err, ClaimError::Conflict(_)));
        assert!(err.is_lost_race());
    }

    #[test]
    fn infrastructure_failures_are_faults() {
        for store_err in [
            StoreError::Timeout(Duration::from_millis(5)),
            StoreError::Unavailable("sink offline".to_string()),
            StoreError::Encoding("bad column".to_string()),
        ] {
            let err = ClaimError::from(store_err);
            assert!(matches!(err, ClaimError::StoreUnavailable(_)));
            assert!(!err.is_lost_race());
        }
    }
}
