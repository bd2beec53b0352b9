use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::Result;
use crate::isolation::IsolationLevel;
use crate::model::{Group, Record, RecordKey, Slot, SlotAddress, Table};
use crate::store::ResourceStore;

// Larger plans grow the row buffer as they go.
const MAX_PREALLOCATED_ROWS: usize = 1 << 16;

/// Layout of a group to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPlan {
    pub name: String,
    pub rows: i32,
    pub columns: i32,
}

impl SeedPlan {
    /// Rows written by seeding this plan: both groups and every slot of each.
    pub fn row_count(&self) -> usize {
        let slots = (self.rows.max(0) as usize).saturating_mul(self.columns.max(0) as usize);
        slots.saturating_mul(2).saturating_add(2)
    }
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            name: "Legia vs Lech".to_string(),
            rows: 10,
            columns: 15,
        }
    }
}

/// Ids of a seeded group and its versioned twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededGroup {
    /// Group whose slots are claimed pessimistically.
    pub group_id: i64,
    /// Twin group whose slots carry version tokens.
    pub versioned_group_id: i64,
    pub rows: i32,
    pub columns: i32,
}

impl SeededGroup {
    pub fn slot(&self, row: i32, column: i32) -> SlotAddress {
        SlotAddress::new(self.group_id, row, column)
    }

    pub fn versioned_slot(&self, row: i32, column: i32) -> SlotAddress {
        SlotAddress::new(self.versioned_group_id, row, column)
    }
}

/// Creates groups and their free slots at setup time.
pub struct Seeder {
    store: Arc<dyn ResourceStore>,
}

impl Seeder {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Creates the plain group and its versioned twin in one transaction.
    pub fn seed(&self, plan: &SeedPlan) -> Result<SeededGroup> {
        let group_id = self.store.next_id();
        let versioned_group_id = self.store.next_id();

        let mut rows = Vec::with_capacity(plan.row_count().min(MAX_PREALLOCATED_ROWS));
        for (table, slot_table, id) in [
            (Table::Groups, Table::Slots, group_id),
            (Table::VersionedGroups, Table::VersionedSlots, versioned_group_id),
        ] {
            rows.push((
                RecordKey::group(table, id),
                Record::Group(Group {
                    id,
                    name: plan.name.clone(),
                }),
            ));
            for row in 0..plan.rows {
                for column in 0..plan.columns {
                    let slot = Slot {
                        id: self.store.next_id(),
                        group_id: id,
                        row,
                        column,
                        claim_id: None,
                    };
                    rows.push((RecordKey::slot(slot_table, slot.address()), Record::Slot(slot)));
                }
            }
        }

        let mut txn = self.store.begin(IsolationLevel::ReadCommitted)?;
        txn.write(rows)?;
        txn.commit()?;
        debug!(
            "Seeded '{}' as groups {} / {} with {}x{} slots",
            plan.name, group_id, versioned_group_id, plan.rows, plan.columns
        );

        Ok(SeededGroup {
            group_id,
            versioned_group_id,
            rows: plan.rows,
            columns: plan.columns,
        })
    }

    /// Seeds a 1x1 group: a single contested slot at (0, 0).
    pub fn seed_single(&self, name: &str) -> Result<SeededGroup> {
        self.seed(&SeedPlan {
            name: name.to_string(),
            rows: 1,
            columns: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Scope;
    use crate::store::memory::MemStore;

    #[test]
    fn seeds_both_tables_with_free_slots() {
        let store = Arc::new(MemStore::in_memory());
        let seeded = Seeder::new(store.clone())
            .seed(&SeedPlan {
                name: "G".to_string(),
                rows: 2,
                columns: 3,
            })
            .unwrap();
        assert_ne!(seeded.group_id, seeded.versioned_group_id);

        let mut txn = store.begin(IsolationLevel::ReadCommitted).unwrap();
        for table in [Table::Slots, Table::VersionedSlots] {
            let slots = txn
                .find_all(&Scope::Prefix(table.prefix().to_string()), &|record| {
                    record.as_slot().is_some_and(Slot::is_free)
                })
                .unwrap();
            assert_eq!(slots.len(), 6);
        }
        assert!(
            txn.exists(&Scope::Key(RecordKey::slot(Table::Slots, seeded.slot(1, 2))))
                .unwrap()
        );
        assert!(
            !txn.exists(&Scope::Key(RecordKey::slot(Table::Slots, seeded.slot(2, 0))))
                .unwrap()
        );
    }

    #[test]
    fn default_plan_matches_the_stadium() {
        let plan = SeedPlan::default();
        assert_eq!((plan.rows, plan.columns), (10, 15));
        assert_eq!(plan.row_count(), 302);
    }

    #[test]
    fn row_count_never_overflows() {
        let huge = SeedPlan {
            name: "huge".to_string(),
            rows: i32::MAX,
            columns: i32::MAX,
        };
        assert!(huge.row_count() >= i32::MAX as usize);

        let negative = SeedPlan {
            rows: -3,
            ..huge
        };
        assert_eq!(negative.row_count(), 2);
    }
}
