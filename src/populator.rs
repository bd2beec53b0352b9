use log::{debug, warn};
use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::errors::{ClaimError, Result};
use crate::isolation::IsolationLevel;
use crate::model::{Member, Record, RecordKey};
use crate::store::{ResourceStore, Scope};

/// Inserts the member set of a group key if, and only if, the key has none yet.
///
/// The check and the insert run in one transaction, but the rows being inserted do not
/// exist when the check runs. Only predicate validation (Serializable) sees the other
/// caller's insert; at every weaker level two callers can both pass the check and both
/// commit, leaving interleaved sets behind.
pub struct GroupPopulator {
    store: Arc<dyn ResourceStore>,
    config: CoordinatorConfig,
}

impl GroupPopulator {
    pub fn new(store: Arc<dyn ResourceStore>, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Stores `proposed` as the members of `group_key`, in order.
    ///
    /// Fails with [`ClaimError::AlreadyExists`] if any member is visible for the key,
    /// and with [`ClaimError::Conflict`] if the store rejects the commit. An empty
    /// proposal is still checked against existing members but stores nothing.
    pub fn populate_group(
        &self,
        group_key: &str,
        proposed: &[String],
        isolation: IsolationLevel,
    ) -> Result<Vec<Member>> {
        let mut txn = self.store.begin(isolation)?;
        let txn_id = txn.id();
        if txn.exists(&Scope::Prefix(RecordKey::member_prefix(group_key)))? {
            txn.rollback();
            return Err(ClaimError::AlreadyExists(group_key.to_string()));
        }
        if proposed.is_empty() {
            txn.rollback();
            return Ok(Vec::new());
        }

        self.config.race_window.wait();

        let members: Vec<Member> = proposed
            .iter()
            .enumerate()
            .map(|(ordinal, text)| Member {
                id: self.store.next_id(),
                group_key: group_key.to_string(),
                ordinal: ordinal as u32,
                text: text.clone(),
            })
            .collect();
        txn.write(
            members
                .iter()
                .map(|member| {
                    (
                        RecordKey::member(group_key, member.id),
                        Record::Member(member.clone()),
                    )
                })
                .collect(),
        )?;

        if let Err(err) = txn.commit() {
            let err = ClaimError::from(err);
            if err.is_lost_race() {
                debug!("Transaction {} lost group '{}': {}", txn_id, group_key, err);
            } else {
                warn!("Transaction {} could not populate group '{}': {}", txn_id, group_key, err);
            }
            return Err(err);
        }

        debug!(
            "Group '{}' populated with {} member(s) at {}",
            group_key,
            members.len(),
            isolation
        );
        Ok(members)
    }

    /// The same check-then-insert with no isolation at all.
    ///
    /// A version-token guard cannot stand in for isolation here: there is no existing
    /// row whose token could be checked, so concurrent callers all succeed.
    pub fn populate_group_unguarded(
        &self,
        group_key: &str,
        proposed: &[String],
    ) -> Result<Vec<Member>> {
        self.populate_group(group_key, proposed, IsolationLevel::Unspecified)
    }

    /// Committed members of `group_key`, by ordinal.
    pub fn members(&self, group_key: &str) -> Result<Vec<Member>> {
        let mut txn = self.store.begin(IsolationLevel::ReadCommitted)?;
        let rows = txn.find_all(
            &Scope::Prefix(RecordKey::member_prefix(group_key)),
            &|record| record.as_member().is_some(),
        )?;
        txn.commit()?;

        let mut members: Vec<Member> = rows
            .into_iter()
            .filter_map(|stored| stored.record.as_member().cloned())
            .collect();
        members.sort_by_key(|member| (member.ordinal, member.id));
        Ok(members)
    }
}
