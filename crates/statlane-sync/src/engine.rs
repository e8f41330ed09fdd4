//! The single action executor.
//!
//! `SyncEngine` owns one store session per application and dispatches each
//! action kind to the gap-detecting range read, the per-metric backfills,
//! ingest, or clear. It runs inside the queue's single lane, so everything
//! here is sequential: one fetch, one store transaction at a time.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info, warn};

use statlane_core::config::SyncConfig;
use statlane_core::dates::{days_before, days_inclusive, previous_day};
use statlane_core::{
    ActionKind, ActionOutput, AppId, DATE_FIELD, KeyShape, KeyValue, Metric, NO_DATA_FIELD, Record,
    SyncSummary, TableDef, format_date, is_sentinel,
};
use statlane_queue::{Action, ActionProcessor, ProcessFuture};
use statlane_store::{SessionOptions, StatsDatabase, StoreSession};

use crate::collaborators::{Collaborators, Parsed};
use crate::endpoints::Endpoints;
use crate::error::{SyncError, SyncResult};
use crate::metrics;

/// Backfill tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Days before today that are always re-fetched by backfills.
    pub recent_refetch_days: u64,
    /// Consecutive empty days that end a wishlist backfill.
    pub wishlist_empty_day_limit: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            recent_refetch_days: 3,
            wishlist_empty_day_limit: 5,
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            recent_refetch_days: config.recent_refetch_days,
            wishlist_empty_day_limit: config.wishlist_empty_day_limit,
        }
    }
}

pub struct SyncEngine {
    db: StatsDatabase,
    schema_version: u64,
    session_options: SessionOptions,
    sessions: Mutex<HashMap<AppId, StoreSession>>,
    collaborators: Collaborators,
    endpoints: Endpoints,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(db: StatsDatabase, collaborators: Collaborators, endpoints: Endpoints) -> Self {
        Self {
            db,
            schema_version: 1,
            session_options: SessionOptions::default(),
            sessions: Mutex::new(HashMap::new()),
            collaborators,
            endpoints,
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Version index and options used when opening application sessions.
    pub fn with_schema(mut self, version_index: u64, options: SessionOptions) -> Self {
        self.schema_version = version_index;
        self.session_options = options;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// The store session for `app_id`, created closed on first request.
    pub fn session(&self, app_id: &AppId) -> StoreSession {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(app_id.clone())
            .or_insert_with(|| {
                StoreSession::new(
                    self.db.clone(),
                    app_id.clone(),
                    self.schema_version,
                    self.session_options.clone(),
                )
            })
            .clone()
    }

    /// Execute one action kind for `app_id`.
    pub async fn run(&self, app_id: &AppId, kind: &ActionKind) -> SyncResult<ActionOutput> {
        match kind {
            ActionKind::Get {
                metric,
                date_start,
                date_end,
                return_lack_data,
            } => {
                self.metric_sync(app_id, *metric)
                    .get(*date_start, *date_end, *return_lack_data)
                    .await
            }
            ActionKind::RequestAll { metric } => {
                let sync = self.metric_sync(app_id, *metric);
                let summary = match metric {
                    Metric::Traffic => metrics::traffic::request_all(&sync).await?,
                    Metric::Wishlists => metrics::wishlists::request_all(&sync).await?,
                    Metric::Sales => metrics::sales::request_all(&sync).await?,
                    Metric::WishlistConversions => {
                        metrics::wishlist_conversions::request_all(&sync).await?
                    }
                    Metric::Reviews => metrics::reviews::request_all(&sync).await?,
                };
                info!(
                    %app_id,
                    %metric,
                    fetched = summary.fetched,
                    written = summary.written,
                    sentinels = summary.sentinels,
                    "backfill finished"
                );
                Ok(ActionOutput::Synced(summary))
            }
            ActionKind::Ingest { metric, raw } => self
                .metric_sync(app_id, *metric)
                .ingest(raw)
                .await
                .map(ActionOutput::Synced),
            ActionKind::Clear { metric } => {
                self.session(app_id).clear(*metric).await?;
                Ok(ActionOutput::Cleared)
            }
            ActionKind::DropApp => {
                let dropped = self.session(app_id).delete_database().await?;
                info!(%app_id, dropped, "application tables dropped");
                Ok(ActionOutput::Dropped(dropped))
            }
        }
    }

    fn metric_sync<'a>(&'a self, app_id: &'a AppId, metric: Metric) -> MetricSync<'a> {
        MetricSync {
            engine: self,
            app_id,
            metric,
            table: metric.table(),
            store: self.session(app_id),
        }
    }
}

impl ActionProcessor for SyncEngine {
    fn process<'a>(&'a self, action: &'a Action) -> ProcessFuture<'a> {
        Box::pin(async move { Ok(self.run(action.app_id(), action.kind()).await?) })
    }
}

/// Rows written for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StoredDay {
    pub written: u32,
    pub sentinels: u32,
}

/// One metric of one application, with the building blocks every
/// synchronizer is assembled from.
pub(crate) struct MetricSync<'a> {
    engine: &'a SyncEngine,
    pub app_id: &'a AppId,
    pub metric: Metric,
    pub table: TableDef,
    pub store: StoreSession,
}

impl MetricSync<'_> {
    pub fn settings(&self) -> &SyncSettings {
        &self.engine.settings
    }

    pub fn today(&self) -> NaiveDate {
        self.engine.collaborators.clock.today()
    }

    /// Last complete day, the upper bound of every backfill.
    pub fn yesterday(&self) -> Option<NaiveDate> {
        previous_day(self.today())
    }

    pub fn page_creation_date(&self) -> SyncResult<NaiveDate> {
        self.engine
            .collaborators
            .apps
            .page_creation_date(self.app_id)
            .ok_or_else(|| SyncError::UnknownApp(self.app_id.clone()))
    }

    /// Fetch and parse the report covering `[start, end]`.
    pub async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> SyncResult<Parsed> {
        let collaborators = &self.engine.collaborators;
        let packages = if self.metric == Metric::Sales {
            collaborators.apps.package_ids(self.app_id)
        } else {
            Vec::new()
        };
        let url = self
            .engine
            .endpoints
            .report(self.metric, self.app_id, start, end, &packages);
        debug!(app_id = %self.app_id, metric = %self.metric, %start, %end, "fetching report");
        let body = collaborators
            .fetcher
            .fetch(&url)
            .await?
            .into_body(&url, self.metric.expects_csv())?;
        collaborators.parser.parse(&body, self.metric)
    }

    /// Bring parsed rows into table shape. Rows for a single-day report get
    /// that day stamped on them; non-date parts of composite keys default to
    /// empty; rows still missing their key are dropped.
    pub fn normalize(&self, rows: Vec<Record>, day: Option<NaiveDate>) -> Vec<Record> {
        let total = rows.len();
        let rows: Vec<Record> = rows
            .into_iter()
            .filter_map(|mut row| {
                if self.metric == Metric::Reviews {
                    metrics::reviews::normalize(&mut row);
                }
                if let Some(day) = day {
                    row.entry(DATE_FIELD)
                        .or_insert_with(|| Value::String(format_date(day)));
                }
                if let KeyShape::Composite(fields) = &self.table.key {
                    for field in fields.iter().filter(|f| *f != self.table.date_field) {
                        row.entry(field.as_str())
                            .or_insert_with(|| Value::String(String::new()));
                    }
                }
                if self.table.auto_increment || self.table.key.key_of(&row).is_some() {
                    Some(row)
                } else {
                    None
                }
            })
            .collect();
        if rows.len() < total {
            warn!(
                app_id = %self.app_id,
                metric = %self.metric,
                dropped = total - rows.len(),
                "rows without a key were dropped"
            );
        }
        rows
    }

    /// Zero row confirming that `date` has no upstream activity.
    pub fn sentinel(&self, date: NaiveDate) -> Record {
        let day = format_date(date);
        let mut row = Record::new();
        if !self.table.auto_increment {
            for field in self.table.key.fields() {
                let value = if field == self.table.date_field {
                    day.clone()
                } else if matches!(self.table.key, KeyShape::Field(_)) {
                    format!("no-data:{day}")
                } else {
                    String::new()
                };
                row.insert(field.to_string(), Value::String(value));
            }
        }
        row.insert(DATE_FIELD.to_string(), Value::String(day));
        row.insert(NO_DATA_FIELD.to_string(), Value::Bool(true));
        row
    }

    /// Sentinels for every day in `[start, end]` that no row covers.
    pub fn gap_sentinels(&self, rows: &[Record], start: NaiveDate, end: NaiveDate) -> Vec<Record> {
        let covered = self.dates_of(rows);
        days_inclusive(start, end)
            .filter(|day| !covered.contains(day))
            .map(|day| self.sentinel(day))
            .collect()
    }

    pub fn dates_of(&self, rows: &[Record]) -> BTreeSet<NaiveDate> {
        rows.iter().filter_map(|row| self.table.date_of(row)).collect()
    }

    /// Keys of the sentinels for `dates`, for tables whose sentinels have a
    /// deterministic key.
    pub fn sentinel_keys(&self, dates: impl IntoIterator<Item = NaiveDate>) -> Vec<KeyValue> {
        if self.table.auto_increment {
            return Vec::new();
        }
        dates
            .into_iter()
            .filter_map(|day| self.table.key.key_of(&self.sentinel(day)))
            .collect()
    }

    /// Store one day's rows: a sentinel when there are none, otherwise the
    /// rows merged in and any earlier sentinel for the day retired.
    pub async fn store_day(&self, date: NaiveDate, rows: Vec<Record>) -> SyncResult<StoredDay> {
        if rows.is_empty() {
            self.store
                .write_upsert_one(self.metric, &self.sentinel(date))
                .await?;
            return Ok(StoredDay {
                written: 1,
                sentinels: 1,
            });
        }
        self.store
            .delete_keys(self.metric, &self.sentinel_keys([date]))
            .await?;
        let written = self.store.merge_upsert(self.metric, &rows).await?;
        Ok(StoredDay {
            written: written as u32,
            sentinels: 0,
        })
    }

    // ── Get ────────────────────────────────────────────────────────

    /// Gap-detected range read.
    pub async fn get(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        return_lack_data: bool,
    ) -> SyncResult<ActionOutput> {
        if start > end {
            return Err(SyncError::InvalidRange { start, end });
        }
        let cached = self.store.read_all(self.metric).await?;
        let present = self.dates_of(&cached);
        let missing: Vec<NaiveDate> = days_inclusive(start, end)
            .filter(|day| !present.contains(day))
            .collect();
        if missing.is_empty() {
            return Ok(ActionOutput::Rows(self.in_range(cached, start, end)));
        }

        let today = self.today();
        debug!(
            app_id = %self.app_id,
            metric = %self.metric,
            missing = missing.len(),
            "filling gaps"
        );
        for date in missing {
            if date > today {
                continue;
            }
            match self.fetch(date, date).await? {
                Parsed::NoData if date == today => {
                    debug!(metric = %self.metric, %date, "no data for today yet");
                }
                Parsed::NoData => {
                    info!(app_id = %self.app_id, metric = %self.metric, %date, "upstream has no data yet");
                    if return_lack_data {
                        break;
                    }
                    return Ok(ActionOutput::NotReady);
                }
                Parsed::Rows(rows) => {
                    let rows = self.normalize(rows, Some(date));
                    self.store_day(date, rows).await?;
                }
            }
        }

        let cached = self.store.read_all(self.metric).await?;
        Ok(ActionOutput::Rows(self.in_range(cached, start, end)))
    }

    /// Rows dated within `[start, end]`, ordered by date.
    fn in_range(&self, rows: Vec<Record>, start: NaiveDate, end: NaiveDate) -> Vec<Record> {
        let mut dated: Vec<(NaiveDate, Record)> = rows
            .into_iter()
            .filter_map(|row| self.table.date_of(&row).map(|day| (day, row)))
            .filter(|(day, _)| *day >= start && *day <= end)
            .collect();
        dated.sort_by_key(|(day, _)| *day);
        dated.into_iter().map(|(_, row)| row).collect()
    }

    // ── Backfills ──────────────────────────────────────────────────

    /// Walk backward one day at a time from yesterday to the page creation
    /// date. Cached days are skipped unless recent; a recent day that is
    /// fetched again has its cached rows replaced. With `empty_day_limit`,
    /// stops after that many consecutive days without data.
    pub async fn walk_back(&self, empty_day_limit: Option<u32>) -> SyncResult<SyncSummary> {
        let floor = self.page_creation_date()?;
        let mut summary = SyncSummary::default();
        let Some(yesterday) = self.yesterday() else {
            return Ok(summary);
        };
        let recent_from =
            days_before(self.today(), self.settings().recent_refetch_days).unwrap_or(floor);
        let mut cached: BTreeMap<NaiveDate, Vec<KeyValue>> = BTreeMap::new();
        for row in self.store.read_all(self.metric).await? {
            if let (Some(day), Some(key)) = (self.table.date_of(&row), self.table.key.key_of(&row)) {
                cached.entry(day).or_default().push(key);
            }
        }

        let mut empty_streak = 0u32;
        let mut date = yesterday;
        while date >= floor {
            if date >= recent_from || !cached.contains_key(&date) {
                summary.fetched += 1;
                match self.fetch(date, date).await? {
                    Parsed::NoData => empty_streak += 1,
                    Parsed::Rows(rows) => {
                        let rows = self.normalize(rows, Some(date));
                        if rows.is_empty() {
                            empty_streak += 1;
                        } else {
                            empty_streak = 0;
                        }
                        // The fresh report replaces everything cached for the day.
                        if let Some(stale) = cached.get(&date) {
                            self.store.delete_keys(self.metric, stale).await?;
                        }
                        let stored = self.store_day(date, rows).await?;
                        summary.written += stored.written;
                        summary.sentinels += stored.sentinels;
                    }
                }
                if empty_day_limit.is_some_and(|limit| empty_streak >= limit) {
                    info!(
                        app_id = %self.app_id,
                        metric = %self.metric,
                        %date,
                        empty_streak,
                        "no data for consecutive days, stopping backfill"
                    );
                    break;
                }
            }
            match previous_day(date) {
                Some(prev) => date = prev,
                None => break,
            }
        }
        Ok(summary)
    }

    /// Fetch the whole history in one report and replace the table with it,
    /// plus sentinels for days without activity.
    pub async fn replace_history(&self) -> SyncResult<SyncSummary> {
        let floor = self.page_creation_date()?;
        let mut summary = SyncSummary::default();
        let Some(yesterday) = self.yesterday().filter(|y| *y >= floor) else {
            return Ok(summary);
        };

        summary.fetched = 1;
        let mut rows = match self.fetch(floor, yesterday).await? {
            Parsed::Rows(rows) => self.normalize(rows, None),
            Parsed::NoData => {
                warn!(
                    app_id = %self.app_id,
                    metric = %self.metric,
                    "history report not available, cache left as is"
                );
                return Ok(summary);
            }
        };
        let sentinels = self.gap_sentinels(&rows, floor, yesterday);
        summary.sentinels = sentinels.len() as u32;
        rows.extend(sentinels);
        summary.written = self.store.replace_all(self.metric, &rows).await? as u32;
        Ok(summary)
    }

    // ── Ingest ─────────────────────────────────────────────────────

    /// Merge rows parsed from pushed raw report text.
    pub async fn ingest(&self, raw: &str) -> SyncResult<SyncSummary> {
        let rows = match self.engine.collaborators.parser.parse(raw, self.metric)? {
            Parsed::Rows(rows) => self.normalize(rows, None),
            Parsed::NoData => return Ok(SyncSummary::default()),
        };
        let fresh: Vec<NaiveDate> = rows
            .iter()
            .filter(|row| !is_sentinel(row))
            .filter_map(|row| self.table.date_of(row))
            .collect();
        self.store
            .delete_keys(self.metric, &self.sentinel_keys(fresh))
            .await?;
        let written = self.store.merge_upsert(self.metric, &rows).await?;
        Ok(SyncSummary {
            fetched: 0,
            written: written as u32,
            sentinels: 0,
        })
    }
}
