//! Seams to the outside world: fetching, parsing, application metadata,
//! and the calendar.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;

use statlane_core::config::AppConfig;
use statlane_core::{AppId, Metric, Record, StatlaneConfig};

use crate::error::{FetchError, SyncResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Fetcher ───────────────────────────────────────────────────────

/// Raw upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchResponse {
    /// A 200 response with no content type.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// The body of a usable report, or why it is not one.
    pub fn into_body(self, url: &str, expects_csv: bool) -> Result<String, FetchError> {
        if !(200..300).contains(&self.status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: self.status,
            });
        }
        if self.body.trim().is_empty() {
            return Err(FetchError::Empty {
                url: url.to_string(),
            });
        }
        if expects_csv && self.looks_like_html() {
            return Err(FetchError::HtmlInsteadOfCsv {
                url: url.to_string(),
            });
        }
        Ok(self.body)
    }

    fn looks_like_html(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"));
        let head: String = self
            .body
            .trim_start()
            .chars()
            .take(15)
            .collect::<String>()
            .to_ascii_lowercase();
        declared || head.starts_with("<!doctype html") || head.starts_with("<html")
    }
}

pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResponse, FetchError>>;
}

// ── Parser ────────────────────────────────────────────────────────

/// Structured result of parsing a report.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// The report exists. Empty means zero activity.
    Rows(Vec<Record>),
    /// Upstream has nothing for the requested window yet.
    NoData,
}

pub trait ReportParser: Send + Sync {
    fn parse(&self, raw: &str, metric: Metric) -> SyncResult<Parsed>;
}

// ── Application metadata ──────────────────────────────────────────

pub trait AppDirectory: Send + Sync {
    /// Earliest day upstream can have data for `app_id`.
    fn page_creation_date(&self, app_id: &AppId) -> Option<NaiveDate>;

    fn package_ids(&self, app_id: &AppId) -> Vec<String>;
}

/// Application metadata taken from the `[apps]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticAppDirectory {
    apps: BTreeMap<String, AppConfig>,
}

impl StaticAppDirectory {
    pub fn from_config(config: &StatlaneConfig) -> Self {
        Self {
            apps: config.apps.clone(),
        }
    }

    pub fn with_app(mut self, app_id: &str, page_creation_date: NaiveDate) -> Self {
        self.apps.insert(
            app_id.to_string(),
            AppConfig {
                page_creation_date,
                package_ids: Vec::new(),
            },
        );
        self
    }

    /// Set the package ids of an application added with [`Self::with_app`].
    pub fn with_packages(mut self, app_id: &str, package_ids: Vec<String>) -> Self {
        if let Some(app) = self.apps.get_mut(app_id) {
            app.package_ids = package_ids;
        }
        self
    }
}

impl AppDirectory for StaticAppDirectory {
    fn page_creation_date(&self, app_id: &AppId) -> Option<NaiveDate> {
        self.apps.get(app_id.as_str()).map(|app| app.page_creation_date)
    }

    fn package_ids(&self, app_id: &AppId) -> Vec<String> {
        self.apps
            .get(app_id.as_str())
            .map(|app| app.package_ids.clone())
            .unwrap_or_default()
    }
}

// ── Clock ─────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local calendar date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<NaiveDate>);

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self(Mutex::new(today))
    }

    pub fn set(&self, today: NaiveDate) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = today;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything a synchronizer consumes from outside the store.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn ReportParser>,
    pub apps: Arc<dyn AppDirectory>,
    pub clock: Arc<dyn Clock>,
}
