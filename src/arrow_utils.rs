use arrow::array::{Array, ArrayRef, Int32Array, Int64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::{Arc, OnceLock};

use crate::errors::{StoreError, StoreResult};
use crate::model::{Claim, Group, Member, Record, RecordKey, Slot};

/// Schema every persisted row is encoded with.
///
/// One wide, nullable layout covers all record kinds; `kind` selects which
/// columns are populated.
pub fn row_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            Arc::new(Schema::new(vec![
                Field::new("key", DataType::Utf8, false),
                Field::new("kind", DataType::Utf8, false),
                Field::new("version", DataType::UInt64, false),
                Field::new("id", DataType::Int64, false),
                Field::new("group_id", DataType::Int64, true),
                Field::new("row", DataType::Int32, true),
                Field::new("column", DataType::Int32, true),
                Field::new("ref_id", DataType::Int64, true),
                Field::new("ordinal", DataType::UInt32, true),
                Field::new("text", DataType::Utf8, true),
                Field::new("group_key", DataType::Utf8, true),
            ]))
        })
        .clone()
}

#[derive(Default)]
struct Columns<'a> {
    id: i64,
    group_id: Option<i64>,
    row: Option<i32>,
    column: Option<i32>,
    ref_id: Option<i64>,
    ordinal: Option<u32>,
    text: Option<&'a str>,
    group_key: Option<&'a str>,
}

/// Encodes one committed row as a single-row `RecordBatch`.
pub fn record_to_batch(key: &RecordKey, record: &Record, version: u64) -> StoreResult<RecordBatch> {
    let columns = match record {
        Record::Group(group) => Columns {
            id: group.id,
            text: Some(&group.name),
            ..Default::default()
        },
        Record::Slot(slot) => Columns {
            id: slot.id,
            group_id: Some(slot.group_id),
            row: Some(slot.row),
            column: Some(slot.column),
            ref_id: slot.claim_id,
            ..Default::default()
        },
        Record::Claim(claim) => Columns {
            id: claim.id,
            ref_id: Some(claim.slot_id),
            ..Default::default()
        },
        Record::Member(member) => Columns {
            id: member.id,
            ordinal: Some(member.ordinal),
            text: Some(&member.text),
            group_key: Some(&member.group_key),
            ..Default::default()
        },
    };

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![key.as_str()])),
        Arc::new(StringArray::from(vec![record.kind()])),
        Arc::new(UInt64Array::from(vec![version])),
        Arc::new(Int64Array::from(vec![columns.id])),
        Arc::new(Int64Array::from(vec![columns.group_id])),
        Arc::new(Int32Array::from(vec![columns.row])),
        Arc::new(Int32Array::from(vec![columns.column])),
        Arc::new(Int64Array::from(vec![columns.ref_id])),
        Arc::new(UInt32Array::from(vec![columns.ordinal])),
        Arc::new(StringArray::from(vec![columns.text])),
        Arc::new(StringArray::from(vec![columns.group_key])),
    ];

    RecordBatch::try_new(row_schema(), arrays).map_err(|e| StoreError::Encoding(e.to_string()))
}

/// Decodes the first row of a batch produced by [`record_to_batch`].
pub fn batch_to_record(batch: &RecordBatch) -> StoreResult<(RecordKey, Record, u64)> {
    if batch.num_rows() == 0 {
        return Err(StoreError::Encoding("empty record batch".to_string()));
    }

    let key = RecordKey::from_raw(required_str(batch, "key")?);
    let kind = required_str(batch, "kind")?;
    let version = column::<UInt64Array>(batch, "version")?.value(0);
    let id = column::<Int64Array>(batch, "id")?.value(0);

    let record = match kind.as_str() {
        "group" => Record::Group(Group {
            id,
            name: optional_str(batch, "text")?.unwrap_or_default(),
        }),
        "slot" => Record::Slot(Slot {
            id,
            group_id: required(optional_i64(batch, "group_id")?, "group_id")?,
            row: required(optional_i32(batch, "row")?, "row")?,
            column: required(optional_i32(batch, "column")?, "column")?,
            claim_id: optional_i64(batch, "ref_id")?,
        }),
        "claim" => Record::Claim(Claim {
            id,
            slot_id: required(optional_i64(batch, "ref_id")?, "ref_id")?,
        }),
        "member" => {
            let ordinal = column::<UInt32Array>(batch, "ordinal")?;
            Record::Member(Member {
                id,
                group_key: required(optional_str(batch, "group_key")?, "group_key")?,
                ordinal: required((!ordinal.is_null(0)).then(|| ordinal.value(0)), "ordinal")?,
                text: optional_str(batch, "text")?.unwrap_or_default(),
            })
        }
        other => {
            return Err(StoreError::Encoding(format!("unknown record kind '{other}'")));
        }
    };

    Ok((key, record, version))
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> StoreResult<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::Encoding(format!("column '{name}' not found")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| StoreError::Encoding(format!("column '{name}' has an unexpected type")))
}

fn required<T>(value: Option<T>, name: &str) -> StoreResult<T> {
    value.ok_or_else(|| StoreError::Encoding(format!("column '{name}' is null")))
}

fn required_str(batch: &RecordBatch, name: &str) -> StoreResult<String> {
    required(optional_str(batch, name)?, name)
}

fn optional_str(batch: &RecordBatch, name: &str) -> StoreResult<Option<String>> {
    let array = column::<StringArray>(batch, name)?;
    Ok((!array.is_null(0)).then(|| array.value(0).to_string()))
}

fn optional_i64(batch: &RecordBatch, name: &str) -> StoreResult<Option<i64>> {
    let array = column::<Int64Array>(batch, name)?;
    Ok((!array.is_null(0)).then(|| array.value(0)))
}

fn optional_i32(batch: &RecordBatch, name: &str) -> StoreResult<Option<i32>> {
    let array = column::<Int32Array>(batch, name)?;
    Ok((!array.is_null(0)).then(|| array.value(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SlotAddress, Table};

    #[test]
    fn claimed_slot_keeps_its_claim_reference() {
        let slot = Slot {
            id: 4,
            group_id: 1,
            row: 2,
            column: 3,
            claim_id: Some(99),
        };
        let key = RecordKey::slot(Table::Slots, slot.address());
        let batch = record_to_batch(&key, &Record::Slot(slot.clone()), 12).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema(), row_schema());

        let (decoded_key, decoded, version) = batch_to_record(&batch).unwrap();
        assert_eq!(decoded_key, key);
        assert_eq!(decoded, Record::Slot(slot));
        assert_eq!(version, 12);
    }

    #[test]
    fn free_slot_encodes_null_reference() {
        let slot = Slot {
            id: 5,
            group_id: 1,
            row: 0,
            column: 0,
            claim_id: None,
        };
        let key = RecordKey::slot(Table::Slots, SlotAddress::new(1, 0, 0));
        let batch = record_to_batch(&key, &Record::Slot(slot), 1).unwrap();
        let ref_id = batch.column_by_name("ref_id").unwrap();
        assert!(ref_id.is_null(0));
    }

    #[test]
    fn unknown_kind_is_an_encoding_error() {
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["x"])),
            Arc::new(StringArray::from(vec!["ticket"])),
            Arc::new(UInt64Array::from(vec![1u64])),
            Arc::new(Int64Array::from(vec![1i64])),
            Arc::new(Int64Array::from(vec![None::<i64>])),
            Arc::new(Int32Array::from(vec![None::<i32>])),
            Arc::new(Int32Array::from(vec![None::<i32>])),
            Arc::new(Int64Array::from(vec![None::<i64>])),
            Arc::new(UInt32Array::from(vec![None::<u32>])),
            Arc::new(StringArray::from(vec![None::<&str>])),
            Arc::new(StringArray::from(vec![None::<&str>])),
        ];
        let batch = RecordBatch::try_new(row_schema(), arrays).unwrap();
        assert!(matches!(batch_to_record(&batch), Err(StoreError::Encoding(_))));
    }
}
