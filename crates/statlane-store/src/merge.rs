//! Shallow record merge used by merge-upsert.

use statlane_core::Record;

/// Merge `update` into `existing`: fields in `update` overwrite same-named
/// fields, every other field of `existing` survives.
pub fn merge_record(existing: &mut Record, update: &Record) {
    for (column, value) in update {
        existing.insert(column.clone(), value.clone());
    }
}
