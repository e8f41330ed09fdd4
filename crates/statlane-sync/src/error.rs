//! Synchronizer error types.

use chrono::NaiveDate;
use thiserror::Error;

use statlane_core::{AppId, Metric};
use statlane_store::StoreError;

pub type SyncResult<T> = Result<T, SyncError>;

/// An upstream request that did not yield a usable report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    Empty { url: String },

    /// Usually an expired session redirected to a login or error page.
    #[error("{url} returned HTML where a CSV report was expected")]
    HtmlInsteadOfCsv { url: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("no page creation date configured for application {0}")]
    UnknownApp(AppId),

    #[error("could not parse {metric} report: {message}")]
    Parse { metric: Metric, message: String },
}
