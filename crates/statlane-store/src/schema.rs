//! Schema catalog, validation, and additive upgrades.
//!
//! The catalog maps each logical table (`{appId}_{Metric}`) to the physical
//! redb table holding its rows together with the key shape that table was
//! created with. Validation compares those shapes against the declared
//! definitions; upgrades only ever add tables and re-point bindings.

use std::collections::{HashMap, HashSet};
use std::fmt;

use redb::{Database, ReadableDatabase, TableError, TableHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use statlane_core::{AppId, KeyShape, Metric, TableDef};

use crate::error::{StoreError, StoreResult};
use crate::tables::{CATALOG, META, VERSION_KEY, data_table, physical_name};

macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Lifecycle of a store session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Closed,
    Opening,
    Validating,
    Upgrading,
    Retrying,
    Ready,
    /// Healing gave up; the session stays unusable.
    Failed,
}

impl StoreState {
    /// Whether the session is between versions and callers should keep polling.
    pub fn is_changing(&self) -> bool {
        matches!(
            self,
            StoreState::Opening | StoreState::Validating | StoreState::Upgrading | StoreState::Retrying
        )
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreState::Closed => "closed",
            StoreState::Opening => "opening",
            StoreState::Validating => "validating",
            StoreState::Upgrading => "upgrading",
            StoreState::Retrying => "retrying",
            StoreState::Ready => "ready",
            StoreState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where a logical table's rows live and which key shape they were written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBinding {
    pub physical: String,
    pub key_shape: KeyShape,
    pub created_version: u64,
}

/// A declared table whose binding is missing or has the wrong key shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub metric: Metric,
    pub expected: KeyShape,
    pub found: Option<KeyShape>,
}

/// Stored version index, or `None` for a fresh database.
pub(crate) fn stored_version(db: &Database) -> StoreResult<Option<u64>> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let meta = match txn.open_table(META) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(StoreError::Table(e.to_string())),
    };
    Ok(meta
        .get(VERSION_KEY)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value()))
}

/// Read every catalog binding belonging to `app_id`'s declared tables.
pub(crate) fn read_bindings(
    db: &Database,
    app_id: &AppId,
    tables: &[TableDef],
) -> StoreResult<HashMap<Metric, TableBinding>> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let catalog = match txn.open_table(CATALOG) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(HashMap::new()),
        Err(e) => return Err(StoreError::Table(e.to_string())),
    };
    let mut bindings = HashMap::new();
    for def in tables {
        let logical = def.metric.table_name(app_id);
        if let Some(guard) = catalog.get(logical.as_str()).map_err(map_err!(Read))? {
            let binding: TableBinding =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            bindings.insert(def.metric, binding);
        }
    }
    Ok(bindings)
}

/// Compare each declared table's stored key shape field by field.
pub(crate) fn validate(
    db: &Database,
    app_id: &AppId,
    tables: &[TableDef],
) -> StoreResult<Result<HashMap<Metric, TableBinding>, Vec<Mismatch>>> {
    let bindings = read_bindings(db, app_id, tables)?;
    let existing = existing_tables(db)?;
    let mismatches: Vec<Mismatch> = tables
        .iter()
        .filter_map(|def| match bindings.get(&def.metric) {
            Some(b) if b.key_shape == def.key && existing.contains(&b.physical) => None,
            found => Some(Mismatch {
                metric: def.metric,
                expected: def.key.clone(),
                found: found.map(|b| b.key_shape.clone()),
            }),
        })
        .collect();
    if mismatches.is_empty() {
        Ok(Ok(bindings))
    } else {
        Ok(Err(mismatches))
    }
}

/// Additive upgrade to `version`: create missing tables, bind a fresh
/// physical table for every shape mismatch, and record the new version.
/// Tables that already match are left alone.
pub(crate) fn upgrade(
    db: &Database,
    app_id: &AppId,
    tables: &[TableDef],
    version: u64,
) -> StoreResult<u32> {
    let current = read_bindings(db, app_id, tables)?;
    let existing = existing_tables(db)?;

    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    let mut created = 0;
    {
        let mut catalog = txn.open_table(CATALOG).map_err(map_err!(Table))?;
        for def in tables {
            let logical = def.metric.table_name(app_id);
            let physical = match current.get(&def.metric) {
                Some(b) if b.key_shape == def.key && existing.contains(&b.physical) => continue,
                Some(b) => {
                    warn!(
                        table = %logical,
                        stored = %b.key_shape,
                        declared = %def.key,
                        version,
                        "key shape mismatch, binding a new table"
                    );
                    physical_name(&logical, Some(version))
                }
                None if existing.contains(&logical) => physical_name(&logical, Some(version)),
                None => physical_name(&logical, None),
            };

            // Opening a table in a write transaction creates it if absent.
            txn.open_table(data_table(&physical)).map_err(map_err!(Table))?;

            let binding = TableBinding {
                physical: physical.clone(),
                key_shape: def.key.clone(),
                created_version: version,
            };
            let value = serde_json::to_vec(&binding).map_err(map_err!(Serialize))?;
            catalog
                .insert(logical.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            debug!(table = %logical, %physical, "table created");
            created += 1;
        }

        let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
        meta.insert(VERSION_KEY, version).map_err(map_err!(Write))?;
    }
    txn.commit().map_err(map_err!(Transaction))?;
    info!(%app_id, version, created, "schema upgraded");
    Ok(created)
}

/// Names of every table currently present in the database.
pub(crate) fn existing_tables(db: &Database) -> StoreResult<HashSet<String>> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let names = txn
        .list_tables()
        .map_err(map_err!(Read))?
        .map(|handle| handle.name().to_string())
        .collect();
    Ok(names)
}
