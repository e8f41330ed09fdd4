//! redb table definitions for the statlane store.
//!
//! Bookkeeping tables have fixed names; data tables are named at runtime
//! from the application id and metric, so they are built on demand.

use redb::TableDefinition;

/// Version index and `seq/{physical}` auto-increment counters.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("__meta");

/// Logical table name → JSON `TableBinding`.
pub const CATALOG: TableDefinition<&str, &[u8]> = TableDefinition::new("__catalog");

/// Meta key holding the current version index.
pub const VERSION_KEY: &str = "version";

/// Data table for a physical name. Keys are canonical key encodings, values
/// JSON records.
pub fn data_table(physical: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(physical)
}

/// Prefix of auto-increment counter keys in `META`.
pub const SEQ_PREFIX: &str = "seq/";

/// Meta key of the auto-increment counter for a physical table.
pub fn seq_key(physical: &str) -> String {
    format!("{SEQ_PREFIX}{physical}")
}

/// Physical name for a logical table created at `version`. The first
/// physical table keeps the bare logical name.
pub fn physical_name(logical: &str, version: Option<u64>) -> String {
    match version {
        None => logical.to_string(),
        Some(v) => format!("{logical}#v{v}"),
    }
}
