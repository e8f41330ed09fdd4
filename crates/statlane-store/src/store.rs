//! StatsDatabase and StoreSession: redb-backed metric tables.
//!
//! `StatsDatabase` owns the redb file (or an in-memory backend for tests)
//! and is shared by every application. `StoreSession` is the handle for one
//! application: it opens lazily, heals its schema, and serves typed CRUD over
//! the five metric tables. All values are JSON-serialized records.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, TableError, TableHandle};
use tracing::{debug, error, info, warn};

use statlane_core::{AppId, KeyValue, Metric, Record, TableDef};

use crate::error::{StoreError, StoreResult};
use crate::merge::merge_record;
use crate::schema::{self, StoreState, TableBinding};
use crate::tables::{CATALOG, META, SEQ_PREFIX, data_table, seq_key};

macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

// ── StatsDatabase ─────────────────────────────────────────────────

/// One redb database holding every application's tables.
#[derive(Clone)]
pub struct StatsDatabase {
    db: Arc<Database>,
}

impl StatsDatabase {
    /// Open (or create) a persistent database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        debug!(?path, "stats database opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Create an ephemeral in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        debug!("in-memory stats database opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// A lazily-opened session for one application with the built-in tables.
    pub fn session(&self, app_id: AppId, version_index: u64) -> StoreSession {
        StoreSession::new(self.clone(), app_id, version_index, SessionOptions::default())
    }

    /// Stored version index, `None` for a fresh database.
    pub fn version(&self) -> StoreResult<Option<u64>> {
        schema::stored_version(&self.db)
    }

    /// Every table name in the database, bookkeeping tables included.
    pub fn table_names(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = schema::existing_tables(&self.db)?.into_iter().collect();
        names.sort();
        Ok(names)
    }

    /// Number of rows in a physical table, `None` if it does not exist.
    pub fn count_rows(&self, physical: &str) -> StoreResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(data_table(physical)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(StoreError::Table(e.to_string())),
        };
        let mut count = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(Some(count))
    }
}

// ── StoreSession ──────────────────────────────────────────────────

/// Tunables for a store session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Version bumps tolerated before storage is declared unavailable.
    pub max_schema_retries: u32,
    /// Sleep between readiness checks in `wait_until_ready`.
    pub poll_interval: Duration,
    /// Declared tables. Defaults to the five built-in metric tables.
    pub tables: Vec<TableDef>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_schema_retries: 200,
            poll_interval: Duration::from_millis(10),
            tables: TableDef::builtin(),
        }
    }
}

/// Mutable session bookkeeping, guarded by a short-lived mutex.
struct SessionState {
    phase: StoreState,
    version: u64,
    bindings: HashMap<Metric, TableBinding>,
    failure: Option<(u32, u64)>,
}

struct SessionInner {
    db: StatsDatabase,
    app_id: AppId,
    requested_version: u64,
    options: SessionOptions,
    state: Mutex<SessionState>,
}

/// Per-application store handle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StoreSession {
    inner: Arc<SessionInner>,
}

impl StoreSession {
    /// Create a closed session. It opens on first use.
    pub fn new(
        db: StatsDatabase,
        app_id: AppId,
        version_index: u64,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                db,
                app_id,
                requested_version: version_index,
                options,
                state: Mutex::new(SessionState {
                    phase: StoreState::Closed,
                    version: version_index,
                    bindings: HashMap::new(),
                    failure: None,
                }),
            }),
        }
    }

    /// Open `app_id`'s tables at `version_index` and wait until they are usable.
    pub async fn open(
        db: StatsDatabase,
        app_id: AppId,
        version_index: u64,
        options: SessionOptions,
    ) -> StoreResult<Self> {
        let session = Self::new(db, app_id, version_index, options);
        session.wait_until_ready().await?;
        Ok(session)
    }

    pub fn app_id(&self) -> &AppId {
        &self.inner.app_id
    }

    pub fn state(&self) -> StoreState {
        self.lock().phase
    }

    /// Version index the session settled on (or is currently trying).
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Physical table currently bound to a metric, once ready.
    pub fn physical_table(&self, metric: Metric) -> Option<String> {
        self.lock().bindings.get(&metric).map(|b| b.physical.clone())
    }

    /// Cooperative readiness poll. Opens a closed session, sleeps while a
    /// version change is in progress, and surfaces a failed initialization.
    pub async fn wait_until_ready(&self) -> StoreResult<()> {
        loop {
            let phase = {
                let mut state = self.lock();
                if state.phase == StoreState::Closed {
                    state.phase = StoreState::Opening;
                    drop(state);
                    return self.heal();
                }
                state.phase
            };
            match phase {
                StoreState::Ready => return Ok(()),
                StoreState::Failed => return Err(self.failure_error()),
                phase if phase.is_changing() => {
                    tokio::time::sleep(self.inner.options.poll_interval).await;
                }
                _ => {}
            }
        }
    }

    /// Close the handle. The next operation reopens and revalidates.
    pub fn close(&self) {
        let mut state = self.lock();
        state.phase = StoreState::Closed;
        state.bindings.clear();
        state.failure = None;
        debug!(app_id = %self.inner.app_id, "store session closed");
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// All rows of a metric table, in key order.
    pub async fn read_all(&self, metric: Metric) -> StoreResult<Vec<Record>> {
        let (binding, _) = self.ready_binding(metric).await?;
        let db = &self.inner.db.db;
        let txn = db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(data_table(&binding.physical))
            .map_err(map_err!(Table))?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: Record =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// A single row by its key.
    pub async fn read_by_key(&self, metric: Metric, key: &KeyValue) -> StoreResult<Option<Record>> {
        let (binding, _) = self.ready_binding(metric).await?;
        let db = &self.inner.db.db;
        let txn = db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(data_table(&binding.physical))
            .map_err(map_err!(Table))?;
        match table.get(key.encode().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: Record =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert or overwrite rows by key. Returns the number written.
    pub async fn write_upsert(&self, metric: Metric, rows: &[Record]) -> StoreResult<usize> {
        self.write_rows(metric, rows, WriteMode::Overwrite).await
    }

    pub async fn write_upsert_one(&self, metric: Metric, row: &Record) -> StoreResult<usize> {
        self.write_upsert(metric, std::slice::from_ref(row)).await
    }

    /// Insert rows, shallow-merging into any existing row with the same key.
    pub async fn merge_upsert(&self, metric: Metric, rows: &[Record]) -> StoreResult<usize> {
        self.write_rows(metric, rows, WriteMode::Merge).await
    }

    pub async fn merge_upsert_one(&self, metric: Metric, row: &Record) -> StoreResult<usize> {
        self.merge_upsert(metric, std::slice::from_ref(row)).await
    }

    /// Clear the table and write `rows` in a single transaction.
    pub async fn replace_all(&self, metric: Metric, rows: &[Record]) -> StoreResult<usize> {
        self.write_rows(metric, rows, WriteMode::Replace).await
    }

    /// Remove every row of a metric table and reset its sequence counter.
    pub async fn clear(&self, metric: Metric) -> StoreResult<()> {
        self.write_rows(metric, &[], WriteMode::Replace).await?;
        info!(app_id = %self.inner.app_id, %metric, "table cleared");
        Ok(())
    }

    /// Remove rows by key. Absent keys are ignored. Returns the number removed.
    pub async fn delete_keys(&self, metric: Metric, keys: &[KeyValue]) -> StoreResult<usize> {
        let (binding, _) = self.ready_binding(metric).await?;
        let db = &self.inner.db.db;
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn
                .open_table(data_table(&binding.physical))
                .map_err(map_err!(Table))?;
            for key in keys {
                if table
                    .remove(key.encode().as_str())
                    .map_err(map_err!(Write))?
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    /// Drop every table and catalog entry of this application, including
    /// tables left behind by earlier healing. The session ends up closed.
    pub async fn delete_database(&self) -> StoreResult<u32> {
        let app_id = &self.inner.app_id;
        let db = &self.inner.db.db;
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        let mut dropped = 0;
        {
            let names: Vec<String> = txn
                .list_tables()
                .map_err(map_err!(Read))?
                .map(|handle| handle.name().to_string())
                .filter(|name| owned_by(name, app_id))
                .collect();
            for name in &names {
                if txn.delete_table(data_table(name)).map_err(map_err!(Table))? {
                    dropped += 1;
                }
            }

            let mut catalog = txn.open_table(CATALOG).map_err(map_err!(Table))?;
            catalog
                .retain(|logical, _| !owned_by(logical, app_id))
                .map_err(map_err!(Write))?;

            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            meta.retain(|key, _| {
                !key.strip_prefix(SEQ_PREFIX)
                    .is_some_and(|physical| owned_by(physical, app_id))
            })
            .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.close();
        info!(%app_id, dropped, "application database deleted");
        Ok(dropped)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: StoreState, version: u64) {
        let mut state = self.lock();
        debug!(
            app_id = %self.inner.app_id,
            from = %state.phase,
            to = %phase,
            version,
            "store state transition"
        );
        state.phase = phase;
        state.version = version;
    }

    fn failure_error(&self) -> StoreError {
        let state = self.lock();
        let (attempts, last_version) = state.failure.unwrap_or((0, state.version));
        StoreError::SchemaUnavailable {
            attempts,
            last_version,
        }
    }

    /// Drive Opening → (Upgrading →) Validating → Ready | Retrying until the
    /// declared tables validate or the retry cap is exceeded.
    fn heal(&self) -> StoreResult<()> {
        let db = &self.inner.db.db;
        let app_id = &self.inner.app_id;
        let tables = &self.inner.options.tables;
        let max_retries = self.inner.options.max_schema_retries;

        let mut version = self.inner.requested_version;
        let mut attempts = 0u32;

        loop {
            self.set_phase(StoreState::Opening, version);
            let stored = match schema::stored_version(db) {
                Ok(stored) => stored,
                Err(e) => return Err(self.fail_with(e, version)),
            };

            match stored {
                Some(stored) if version <= stored => {
                    // A lower request opens whatever version is on disk.
                    version = stored;
                }
                _ => {
                    self.set_phase(StoreState::Upgrading, version);
                    if let Err(e) = schema::upgrade(db, app_id, tables, version) {
                        return Err(self.fail_with(e, version));
                    }
                    // Reopen at the same version.
                    continue;
                }
            }

            self.set_phase(StoreState::Validating, version);
            let validated = match schema::validate(db, app_id, tables) {
                Ok(validated) => validated,
                Err(e) => return Err(self.fail_with(e, version)),
            };
            match validated {
                Ok(bindings) => {
                    let mut state = self.lock();
                    state.phase = StoreState::Ready;
                    state.version = version;
                    state.bindings = bindings;
                    info!(%app_id, version, attempts, "store session ready");
                    return Ok(());
                }
                Err(mismatches) => {
                    attempts += 1;
                    for m in &mismatches {
                        warn!(
                            %app_id,
                            metric = %m.metric,
                            expected = %m.expected,
                            found = ?m.found.as_ref().map(ToString::to_string),
                            version,
                            "schema validation failed"
                        );
                    }
                    if attempts > max_retries {
                        let mut state = self.lock();
                        state.phase = StoreState::Failed;
                        state.failure = Some((attempts, version));
                        error!(%app_id, attempts, version, "persistent storage unavailable");
                        return Err(StoreError::SchemaUnavailable {
                            attempts,
                            last_version: version,
                        });
                    }
                    self.set_phase(StoreState::Retrying, version);
                    version += 1;
                }
            }
        }
    }

    /// Transient failures while healing close the session so the next call retries.
    fn fail_with(&self, err: StoreError, version: u64) -> StoreError {
        warn!(app_id = %self.inner.app_id, version, error = %err, "store open failed");
        self.close();
        err
    }

    async fn ready_binding(&self, metric: Metric) -> StoreResult<(TableBinding, TableDef)> {
        let def = self
            .inner
            .options
            .tables
            .iter()
            .find(|d| d.metric == metric)
            .cloned()
            .ok_or_else(|| StoreError::Table(format!("{metric} is not declared")))?;
        self.wait_until_ready().await?;
        let binding = self
            .lock()
            .bindings
            .get(&metric)
            .cloned()
            .ok_or(StoreError::Closed)?;
        Ok((binding, def))
    }

    async fn write_rows(&self, metric: Metric, rows: &[Record], mode: WriteMode) -> StoreResult<usize> {
        let (binding, def) = self.ready_binding(metric).await?;
        let physical = binding.physical.as_str();
        let db = &self.inner.db.db;

        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        let written;
        {
            let mut table = txn.open_table(data_table(physical)).map_err(map_err!(Table))?;
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let seq = seq_key(physical);

            let mut next_seq = if mode == WriteMode::Replace {
                table.retain(|_, _| false).map_err(map_err!(Write))?;
                0
            } else {
                meta.get(seq.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value())
                    .unwrap_or(0)
            };

            for row in rows {
                let mut row = row.clone();
                let key = match def.key.key_of(&row) {
                    Some(key) => {
                        if def.auto_increment {
                            if let Some(id) = key.parts().first().and_then(|v| v.as_u64()) {
                                next_seq = next_seq.max(id);
                            }
                        }
                        key
                    }
                    None if def.auto_increment => {
                        next_seq += 1;
                        let field = def.key.fields()[0].to_string();
                        row.insert(field, next_seq.into());
                        KeyValue::single(next_seq)
                    }
                    None => {
                        return Err(StoreError::MissingKey {
                            table: physical.to_string(),
                            key: def.key.to_string(),
                        });
                    }
                };
                let encoded = key.encode();

                if mode == WriteMode::Merge {
                    let existing = table
                        .get(encoded.as_str())
                        .map_err(map_err!(Read))?
                        .map(|guard| serde_json::from_slice::<Record>(guard.value()))
                        .transpose()
                        .map_err(map_err!(Deserialize))?;
                    if let Some(mut existing) = existing {
                        merge_record(&mut existing, &row);
                        row = existing;
                    }
                }

                let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                table
                    .insert(encoded.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            written = rows.len();

            if next_seq == 0 {
                meta.remove(seq.as_str()).map_err(map_err!(Write))?;
            } else {
                meta.insert(seq.as_str(), next_seq).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app_id = %self.inner.app_id, %metric, ?mode, written, "rows stored");
        Ok(written)
    }
}

/// Whether a logical or physical table name belongs to `app_id`.
fn owned_by(name: &str, app_id: &AppId) -> bool {
    Metric::ALL.iter().any(|metric| {
        let logical = metric.table_name(app_id);
        name == logical
            || name
                .strip_prefix(logical.as_str())
                .is_some_and(|rest| rest.starts_with('#'))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Overwrite,
    Merge,
    Replace,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn app(id: &str) -> AppId {
        AppId::new(id).unwrap()
    }

    async fn test_session(id: &str) -> StoreSession {
        let db = StatsDatabase::open_in_memory().unwrap();
        StoreSession::open(db, app(id), 1, SessionOptions::default())
            .await
            .unwrap()
    }

    // ── Opening ────────────────────────────────────────────────────

    #[tokio::test]
    async fn fresh_database_opens_ready_at_requested_version() {
        let db = StatsDatabase::open_in_memory().unwrap();
        let session = StoreSession::open(db.clone(), app("440"), 1, SessionOptions::default())
            .await
            .unwrap();

        assert_eq!(session.state(), StoreState::Ready);
        assert_eq!(session.version(), 1);
        assert_eq!(db.version().unwrap(), Some(1));
        for metric in Metric::ALL {
            assert_eq!(
                session.physical_table(metric),
                Some(metric.table_name(&app("440")))
            );
        }
    }

    #[tokio::test]
    async fn lazy_session_opens_on_first_read() {
        let db = StatsDatabase::open_in_memory().unwrap();
        let session = db.session(app("440"), 1);
        assert_eq!(session.state(), StoreState::Closed);

        assert!(session.read_all(Metric::Sales).await.unwrap().is_empty());
        assert_eq!(session.state(), StoreState::Ready);
    }

    #[tokio::test]
    async fn second_application_reuses_stored_version() {
        let db = StatsDatabase::open_in_memory().unwrap();
        StoreSession::open(db.clone(), app("10"), 1, SessionOptions::default())
            .await
            .unwrap();

        // Tables for app 20 do not exist at version 1, so healing bumps once.
        let other = StoreSession::open(db.clone(), app("20"), 1, SessionOptions::default())
            .await
            .unwrap();
        assert_eq!(other.version(), 2);
        assert_eq!(
            other.physical_table(Metric::Traffic).as_deref(),
            Some("20_Traffic")
        );
    }

    #[tokio::test]
    async fn close_then_reopen_keeps_data() {
        let session = test_session("440").await;
        session
            .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01", "adds": 3})))
            .await
            .unwrap();

        session.close();
        assert_eq!(session.state(), StoreState::Closed);

        let rows = session.read_all(Metric::Wishlists).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(session.state(), StoreState::Ready);
    }

    // ── CRUD ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_upsert_and_read_by_key() {
        let session = test_session("440").await;
        let row = record(json!({
            "date": "2024-01-02",
            "page_category": "Store",
            "page_feature": "Search",
            "visits": 12
        }));
        session.write_upsert_one(Metric::Traffic, &row).await.unwrap();

        let key = KeyValue(vec![json!("2024-01-02"), json!("Store"), json!("Search")]);
        let found = session.read_by_key(Metric::Traffic, &key).await.unwrap();
        assert_eq!(found, Some(row));

        let missing = KeyValue(vec![json!("2024-01-03"), json!("Store"), json!("Search")]);
        assert!(session.read_by_key(Metric::Traffic, &missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_keys_ignores_absent_rows() {
        let session = test_session("440").await;
        session
            .write_upsert(
                Metric::Wishlists,
                &[
                    record(json!({"date": "2024-01-01", "adds": 1})),
                    record(json!({"date": "2024-01-02", "adds": 2})),
                ],
            )
            .await
            .unwrap();

        let removed = session
            .delete_keys(
                Metric::Wishlists,
                &[KeyValue::single("2024-01-01"), KeyValue::single("2023-12-31")],
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(session.read_all(Metric::Wishlists).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_upsert_overwrites_whole_row() {
        let session = test_session("440").await;
        session
            .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01", "adds": 3, "deletes": 1})))
            .await
            .unwrap();
        session
            .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01", "adds": 5})))
            .await
            .unwrap();

        let rows = session.read_all(Metric::Wishlists).await.unwrap();
        assert_eq!(rows, vec![record(json!({"date": "2024-01-01", "adds": 5}))]);
    }

    #[tokio::test]
    async fn merge_upsert_keeps_unrelated_columns() {
        let session = test_session("440").await;
        session
            .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01", "adds": 3, "deletes": 1})))
            .await
            .unwrap();
        session
            .merge_upsert(
                Metric::Wishlists,
                &[
                    record(json!({"date": "2024-01-01", "adds": 4, "country_de": 2})),
                    record(json!({"date": "2024-01-02", "adds": 1})),
                ],
            )
            .await
            .unwrap();

        let rows = session.read_all(Metric::Wishlists).await.unwrap();
        assert_eq!(
            rows,
            vec![
                record(json!({"date": "2024-01-01", "adds": 4, "deletes": 1, "country_de": 2})),
                record(json!({"date": "2024-01-02", "adds": 1})),
            ]
        );
    }

    #[tokio::test]
    async fn merge_upsert_disjoint_updates_in_either_order() {
        let first = record(json!({"date": "2024-01-01", "adds": 2}));
        let second = record(json!({"date": "2024-01-01", "deletes": 7}));

        let a = test_session("1").await;
        a.merge_upsert_one(Metric::Wishlists, &first).await.unwrap();
        a.merge_upsert_one(Metric::Wishlists, &second).await.unwrap();

        let b = test_session("1").await;
        b.merge_upsert_one(Metric::Wishlists, &second).await.unwrap();
        b.merge_upsert_one(Metric::Wishlists, &first).await.unwrap();

        assert_eq!(
            a.read_all(Metric::Wishlists).await.unwrap(),
            b.read_all(Metric::Wishlists).await.unwrap()
        );
    }

    #[tokio::test]
    async fn rows_without_key_are_rejected() {
        let session = test_session("440").await;
        let result = session
            .write_upsert_one(Metric::Traffic, &record(json!({"date": "2024-01-01", "visits": 1})))
            .await;
        assert!(matches!(result, Err(StoreError::MissingKey { .. })));
        assert!(session.read_all(Metric::Traffic).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_increment_assigns_sequence_ids() {
        let session = test_session("440").await;
        session
            .write_upsert(
                Metric::Sales,
                &[
                    record(json!({"date": "2024-01-01", "units": 1})),
                    record(json!({"date": "2024-01-01", "units": 2})),
                ],
            )
            .await
            .unwrap();
        session
            .write_upsert_one(Metric::Sales, &record(json!({"date": "2024-01-02", "units": 3})))
            .await
            .unwrap();

        let found = session
            .read_by_key(Metric::Sales, &KeyValue::single(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["units"], 3);
        assert_eq!(session.read_all(Metric::Sales).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn replace_all_restarts_sequence() {
        let session = test_session("440").await;
        let rows = vec![
            record(json!({"date": "2024-01-01", "units": 1})),
            record(json!({"date": "2024-01-02", "units": 2})),
        ];
        session.replace_all(Metric::Sales, &rows).await.unwrap();
        let first = session.read_all(Metric::Sales).await.unwrap();

        session.replace_all(Metric::Sales, &rows).await.unwrap();
        let second = session.read_all(Metric::Sales).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn clear_empties_only_that_table() {
        let session = test_session("440").await;
        session
            .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01"})))
            .await
            .unwrap();
        session
            .write_upsert_one(Metric::Reviews, &record(json!({"recommendationid": "r1", "date": "2024-01-01"})))
            .await
            .unwrap();

        session.clear(Metric::Wishlists).await.unwrap();

        assert!(session.read_all(Metric::Wishlists).await.unwrap().is_empty());
        assert_eq!(session.read_all(Metric::Reviews).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn applications_are_isolated() {
        let db = StatsDatabase::open_in_memory().unwrap();
        let a = StoreSession::open(db.clone(), app("1"), 1, SessionOptions::default())
            .await
            .unwrap();
        let b = StoreSession::open(db.clone(), app("1_b"), 1, SessionOptions::default())
            .await
            .unwrap();

        a.write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01"})))
            .await
            .unwrap();
        assert!(b.read_all(Metric::Wishlists).await.unwrap().is_empty());

        // Deleting app "1" must not touch "1_b" even though the names share a prefix.
        b.write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-05"})))
            .await
            .unwrap();
        a.delete_database().await.unwrap();
        assert_eq!(b.read_all(Metric::Wishlists).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_database_drops_tables_and_reopens_empty() {
        let db = StatsDatabase::open_in_memory().unwrap();
        let session = StoreSession::open(db.clone(), app("440"), 1, SessionOptions::default())
            .await
            .unwrap();
        session
            .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01"})))
            .await
            .unwrap();

        let dropped = session.delete_database().await.unwrap();
        assert_eq!(dropped, 5);
        assert_eq!(session.state(), StoreState::Closed);
        assert!(!db.table_names().unwrap().contains(&"440_Wishlists".to_string()));

        // Next access recreates the tables.
        assert!(session.read_all(Metric::Wishlists).await.unwrap().is_empty());
        assert_eq!(session.state(), StoreState::Ready);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stats.redb");

        {
            let db = StatsDatabase::open(&db_path).unwrap();
            let session = StoreSession::open(db, app("440"), 1, SessionOptions::default())
                .await
                .unwrap();
            session
                .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01", "adds": 9})))
                .await
                .unwrap();
        }

        let db = StatsDatabase::open(&db_path).unwrap();
        let session = StoreSession::open(db, app("440"), 1, SessionOptions::default())
            .await
            .unwrap();
        let rows = session.read_all(Metric::Wishlists).await.unwrap();
        assert_eq!(rows[0]["adds"], 9);
        assert_eq!(session.version(), 1);
    }

    #[test]
    fn owned_by_matches_logical_and_healed_names() {
        let id = app("7");
        assert!(owned_by("7_Traffic", &id));
        assert!(owned_by("7_Traffic#v3", &id));
        assert!(!owned_by("7_b_Traffic", &id));
        assert!(!owned_by("__catalog", &id));
    }
}
