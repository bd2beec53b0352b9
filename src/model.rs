//! Records held by a resource store and the keys they live under.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tables of the claim schema. Every key starts with its table prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Groups,
    Slots,
    Claims,
    VersionedGroups,
    VersionedSlots,
    VersionedClaims,
    Members,
}

impl Table {
    pub fn prefix(self) -> &'static str {
        match self {
            Table::Groups => "groups/",
            Table::Slots => "slots/",
            Table::Claims => "claims/",
            Table::VersionedGroups => "vgroups/",
            Table::VersionedSlots => "vslots/",
            Table::VersionedClaims => "vclaims/",
            Table::Members => "members/",
        }
    }

    /// The claim table paired with a slot table.
    pub fn claims_for(self) -> Table {
        match self {
            Table::VersionedSlots => Table::VersionedClaims,
            _ => Table::Claims,
        }
    }

    pub fn from_key(key: &str) -> Option<Table> {
        [
            Table::Groups,
            Table::Slots,
            Table::Claims,
            Table::VersionedGroups,
            Table::VersionedSlots,
            Table::VersionedClaims,
            Table::Members,
        ]
        .into_iter()
        .find(|table| key.starts_with(table.prefix()))
    }
}

/// The key of one row in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn group(table: Table, id: i64) -> Self {
        Self(format!("{}{id:020}", table.prefix()))
    }

    pub fn slot(table: Table, address: SlotAddress) -> Self {
        Self(format!(
            "{}{:020}/{}/{}",
            table.prefix(),
            address.group_id,
            address.row,
            address.column
        ))
    }

    pub fn claim(table: Table, id: i64) -> Self {
        Self(format!("{}{id:020}", table.prefix()))
    }

    pub fn member(group_key: &str, id: i64) -> Self {
        Self(format!("{}{}{id:020}", Table::Members.prefix(), member_prefix_tail(group_key)))
    }

    /// Key range holding every member of `group_key`.
    pub fn member_prefix(group_key: &str) -> String {
        format!("{}{}", Table::Members.prefix(), member_prefix_tail(group_key))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn table(&self) -> Option<Table> {
        Table::from_key(&self.0)
    }
}

// Group keys are caller supplied; a '/' inside one must not widen the range to another key.
// '%' is escaped first so distinct keys never share an escaped form.
fn member_prefix_tail(group_key: &str) -> String {
    format!("{}/", group_key.replace('%', "%25").replace('/', "%2F"))
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a slot: `(group_id, row, column)` is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    pub group_id: i64,
    pub row: i32,
    pub column: i32,
}

impl SlotAddress {
    pub fn new(group_id: i64, row: i32, column: i32) -> Self {
        Self {
            group_id,
            row,
            column,
        }
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(group {}, row {}, column {})", self.group_id, self.row, self.column)
    }
}

/// Opaque per-row stamp. The store replaces it on every write to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub(crate) u64);

impl VersionToken {
    /// Token of a row that has never been written.
    pub const ABSENT: VersionToken = VersionToken(0);

    pub fn is_absent(self) -> bool {
        self == Self::ABSENT
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: i64,
    pub group_id: i64,
    pub row: i32,
    pub column: i32,
    pub claim_id: Option<i64>,
}

impl Slot {
    pub fn address(&self) -> SlotAddress {
        SlotAddress::new(self.group_id, self.row, self.column)
    }

    pub fn is_free(&self) -> bool {
        self.claim_id.is_none()
    }
}

/// Proof of exclusive ownership of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: i64,
    pub slot_id: i64,
}

/// A slot read together with the version token it carried at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSlot {
    pub slot: Slot,
    pub version: VersionToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub group_key: String,
    pub ordinal: u32,
    pub text: String,
}

/// Any row the claim schema stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Group(Group),
    Slot(Slot),
    Claim(Claim),
    Member(Member),
}

impl Record {
    pub fn as_slot(&self) -> Option<&Slot> {
        match self {
            Record::Slot(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn as_claim(&self) -> Option<&Claim> {
        match self {
            Record::Claim(claim) => Some(claim),
            _ => None,
        }
    }

    pub fn as_member(&self) -> Option<&Member> {
        match self {
            Record::Member(member) => Some(member),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Record::Group(_) => "group",
            Record::Slot(_) => "slot",
            Record::Claim(_) => "claim",
            Record::Member(_) => "member",
        }
    }
}

/// A committed row as returned by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub record: Record,
    pub version: VersionToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_their_table() {
        let address = SlotAddress::new(3, 1, 2);
        assert_eq!(
            RecordKey::slot(Table::Slots, address).table(),
            Some(Table::Slots)
        );
        assert_eq!(
            RecordKey::slot(Table::VersionedSlots, address).table(),
            Some(Table::VersionedSlots)
        );
        assert_eq!(RecordKey::member("T1", 9).table(), Some(Table::Members));
    }

    #[test]
    fn member_ranges_do_not_overlap() {
        let t1 = RecordKey::member_prefix("T1");
        assert!(RecordKey::member("T1", 4).as_str().starts_with(&t1));
        assert!(!RecordKey::member("T10", 4).as_str().starts_with(&t1));
        assert!(!RecordKey::member("T1/x", 4).as_str().starts_with(&t1));

        let slashed = RecordKey::member_prefix("a/b");
        let escaped = RecordKey::member_prefix("a%2Fb");
        assert_ne!(slashed, escaped);
        assert!(!RecordKey::member("a%2Fb", 4).as_str().starts_with(&slashed));
        assert!(!RecordKey::member("a/b", 4).as_str().starts_with(&escaped));
    }

    #[test]
    fn slot_keys_order_by_group() {
        let a = RecordKey::slot(Table::Slots, SlotAddress::new(2, 0, 0));
        let b = RecordKey::slot(Table::Slots, SlotAddress::new(10, 0, 0));
        assert!(a < b);
    }
}
