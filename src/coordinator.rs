use log::{debug, warn};
use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::errors::{ClaimError, Result};
use crate::isolation::IsolationLevel;
use crate::model::{Claim, Record, RecordKey, Slot, SlotAddress, Table, VersionedSlot};
use crate::store::{ResourceStore, Scope, StoreTransaction};

/// Hands out exclusive claims on slots.
///
/// Two strategies are offered. [`ClaimCoordinator::claim_slot`] relies entirely on the
/// isolation level of its transaction and is only exclusive at Snapshot or stronger.
/// [`ClaimCoordinator::claim_slot_versioned`] guards the slot update with the version
/// token read alongside it and is exclusive at every level.
///
/// The coordinator holds no state between calls; every call opens its own transaction
/// and all exclusion is the store's.
pub struct ClaimCoordinator {
    store: Arc<dyn ResourceStore>,
    config: CoordinatorConfig,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn ResourceStore>, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Claims a free slot from the plain slot table inside a transaction at `isolation`.
    ///
    /// Fails with [`ClaimError::NotAvailable`] if the slot does not exist or is already
    /// claimed, and with [`ClaimError::Conflict`] if the store rejects the commit.
    pub fn claim_slot(
        &self,
        group_id: i64,
        row: i32,
        column: i32,
        isolation: IsolationLevel,
    ) -> Result<Claim> {
        let address = SlotAddress::new(group_id, row, column);
        let mut txn = self.store.begin(isolation)?;

        let Some(found) = txn.find(
            &Scope::Key(RecordKey::slot(Table::Slots, address)),
            &|record| record.as_slot().is_some_and(Slot::is_free),
        )?
        else {
            txn.rollback();
            return Err(ClaimError::NotAvailable(address));
        };
        let Some(slot) = found.record.as_slot().cloned() else {
            txn.rollback();
            return Err(ClaimError::NotAvailable(address));
        };

        self.config.race_window.wait();

        let claim = Claim {
            id: self.store.next_id(),
            slot_id: slot.id,
        };
        txn.write(vec![
            (
                found.key,
                Record::Slot(Slot {
                    claim_id: Some(claim.id),
                    ..slot
                }),
            ),
            (
                RecordKey::claim(Table::Claims, claim.id),
                Record::Claim(claim.clone()),
            ),
        ])?;
        commit(txn, address)?;

        debug!("Claim {} attached to slot {} at {}", claim.id, address, isolation);
        Ok(claim)
    }

    /// Claims a free slot from the versioned slot table, guarded by its version token.
    pub fn claim_slot_versioned(&self, group_id: i64, row: i32, column: i32) -> Result<Claim> {
        self.claim_slot_versioned_under(group_id, row, column, IsolationLevel::Unspecified)
    }

    /// [`ClaimCoordinator::claim_slot_versioned`] inside a transaction at `isolation`.
    ///
    /// The slot update only commits if the slot's token is still the one read, so a
    /// concurrent claim in between turns into [`ClaimError::Conflict`] whatever the level.
    pub fn claim_slot_versioned_under(
        &self,
        group_id: i64,
        row: i32,
        column: i32,
        isolation: IsolationLevel,
    ) -> Result<Claim> {
        let address = SlotAddress::new(group_id, row, column);
        let mut txn = self.store.begin(isolation)?;

        let read = txn.find(
            &Scope::Key(RecordKey::slot(Table::VersionedSlots, address)),
            &|record| record.as_slot().is_some(),
        )?;
        let Some((key, slot, version)) = read.and_then(|stored| {
            let slot = stored.record.as_slot().cloned()?;
            Some((stored.key, slot, stored.version))
        }) else {
            txn.rollback();
            return Err(ClaimError::NotAvailable(address));
        };
        if !slot.is_free() {
            txn.rollback();
            return Err(ClaimError::NotAvailable(address));
        }

        self.config.race_window.wait();

        let claim = Claim {
            id: self.store.next_id(),
            slot_id: slot.id,
        };
        txn.conditional_write(
            key,
            Record::Slot(Slot {
                claim_id: Some(claim.id),
                ..slot
            }),
            version,
        )?;
        txn.write(vec![(
            RecordKey::claim(Table::VersionedClaims, claim.id),
            Record::Claim(claim.clone()),
        )])?;
        commit(txn, address)?;

        debug!("Claim {} attached to versioned slot {} (read at {})", claim.id, address, version);
        Ok(claim)
    }

    /// Every committed claim referencing the slot. More than one means a lost update.
    pub fn claims_on(&self, group_id: i64, row: i32, column: i32) -> Result<Vec<Claim>> {
        self.claims_in(Table::Slots, SlotAddress::new(group_id, row, column))
    }

    pub fn versioned_claims_on(&self, group_id: i64, row: i32, column: i32) -> Result<Vec<Claim>> {
        self.claims_in(Table::VersionedSlots, SlotAddress::new(group_id, row, column))
    }

    pub fn slot(&self, group_id: i64, row: i32, column: i32) -> Result<Option<Slot>> {
        let address = SlotAddress::new(group_id, row, column);
        Ok(self
            .read_slot(Table::Slots, address)?
            .map(|versioned| versioned.slot))
    }

    pub fn versioned_slot(
        &self,
        group_id: i64,
        row: i32,
        column: i32,
    ) -> Result<Option<VersionedSlot>> {
        self.read_slot(Table::VersionedSlots, SlotAddress::new(group_id, row, column))
    }

    fn read_slot(&self, table: Table, address: SlotAddress) -> Result<Option<VersionedSlot>> {
        let mut txn = self.store.begin(IsolationLevel::ReadCommitted)?;
        let found = txn.find(&Scope::Key(RecordKey::slot(table, address)), &|record| {
            record.as_slot().is_some()
        })?;
        txn.commit()?;
        Ok(found.and_then(|stored| {
            Some(VersionedSlot {
                slot: stored.record.as_slot().cloned()?,
                version: stored.version,
            })
        }))
    }

    fn claims_in(&self, slot_table: Table, address: SlotAddress) -> Result<Vec<Claim>> {
        let Some(slot) = self.read_slot(slot_table, address)? else {
            return Ok(Vec::new());
        };
        let slot_id = slot.slot.id;

        let mut txn = self.store.begin(IsolationLevel::ReadCommitted)?;
        let rows = txn.find_all(
            &Scope::Prefix(slot_table.claims_for().prefix().to_string()),
            &|record| record.as_claim().is_some_and(|claim| claim.slot_id == slot_id),
        )?;
        txn.commit()?;
        Ok(rows
            .into_iter()
            .filter_map(|stored| stored.record.as_claim().cloned())
            .collect())
    }
}

fn commit(txn: Box<dyn StoreTransaction>, address: SlotAddress) -> Result<()> {
    let txn_id = txn.id();
    match txn.commit() {
        Ok(_) => Ok(()),
        Err(err) => {
            let err = ClaimError::from(err);
            if err.is_lost_race() {
                debug!("Transaction {} lost the race for slot {}: {}", txn_id, address, err);
            } else {
                warn!("Transaction {} could not claim slot {}: {}", txn_id, address, err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::Seeder;
    use crate::store::memory::MemStore;

    fn coordinator() -> (ClaimCoordinator, crate::seed::SeededGroup) {
        let store: Arc<dyn ResourceStore> = Arc::new(MemStore::in_memory());
        let seeded = Seeder::new(store.clone()).seed_single("G").unwrap();
        (ClaimCoordinator::new(store, CoordinatorConfig::default()), seeded)
    }

    #[test]
    fn claim_attaches_to_slot() {
        let (coordinator, seeded) = coordinator();
        let claim = coordinator
            .claim_slot(seeded.group_id, 0, 0, IsolationLevel::Serializable)
            .unwrap();

        let slot = coordinator.slot(seeded.group_id, 0, 0).unwrap().unwrap();
        assert_eq!(slot.claim_id, Some(claim.id));
        assert_eq!(claim.slot_id, slot.id);
        assert_eq!(coordinator.claims_on(seeded.group_id, 0, 0).unwrap(), vec![claim]);
    }

    #[test]
    fn missing_slot_is_not_available() {
        let (coordinator, seeded) = coordinator();
        let err = coordinator
            .claim_slot(seeded.group_id, 4, 4, IsolationLevel::ReadCommitted)
            .unwrap_err();
        assert_eq!(err, ClaimError::NotAvailable(SlotAddress::new(seeded.group_id, 4, 4)));

        let err = coordinator
            .claim_slot_versioned(seeded.versioned_group_id, 4, 4)
            .unwrap_err();
        assert!(matches!(err, ClaimError::NotAvailable(_)));
    }

    #[test]
    fn versioned_claim_bumps_the_token() {
        let (coordinator, seeded) = coordinator();
        let before = coordinator
            .versioned_slot(seeded.versioned_group_id, 0, 0)
            .unwrap()
            .unwrap();
        let claim = coordinator
            .claim_slot_versioned(seeded.versioned_group_id, 0, 0)
            .unwrap();
        let after = coordinator
            .versioned_slot(seeded.versioned_group_id, 0, 0)
            .unwrap()
            .unwrap();

        assert!(after.version > before.version);
        assert_eq!(after.slot.claim_id, Some(claim.id));
        assert_eq!(
            coordinator
                .versioned_claims_on(seeded.versioned_group_id, 0, 0)
                .unwrap()
                .len(),
            1
        );
        // The plain twin is untouched.
        assert!(coordinator.claims_on(seeded.group_id, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn no_transaction_left_open() {
        let (coordinator, seeded) = coordinator();
        let _ = coordinator.claim_slot(seeded.group_id, 0, 0, IsolationLevel::Snapshot);
        let _ = coordinator.claim_slot(seeded.group_id, 0, 0, IsolationLevel::Snapshot);
        let _ = coordinator.claim_slot_versioned(seeded.versioned_group_id, 9, 9);
        assert_eq!(coordinator.store().active_transactions(), Some(0));
    }
}
