//! The action vocabulary shared by the queue and the synchronizers.
//!
//! An action is one unit of work bound to an application. Its kind is a
//! tagged union; a single processor matches on it, so there is no per-action
//! trait object.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{Metric, Record};

/// What an action does once it reaches the front of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Gap-detected range read.
    Get {
        metric: Metric,
        date_start: NaiveDate,
        date_end: NaiveDate,
        /// Return whatever is cached even if gaps could not be filled.
        return_lack_data: bool,
    },
    /// Bulk backfill of a metric's full history.
    RequestAll { metric: Metric },
    /// Parse pushed raw report text and merge it into the cache.
    Ingest { metric: Metric, raw: String },
    /// Drop every cached row of a metric.
    Clear { metric: Metric },
    /// Drop every table of the application, including healed leftovers.
    DropApp,
}

impl ActionKind {
    /// The metric acted on, `None` for whole-application actions.
    pub fn metric(&self) -> Option<Metric> {
        match self {
            ActionKind::Get { metric, .. }
            | ActionKind::RequestAll { metric }
            | ActionKind::Ingest { metric, .. }
            | ActionKind::Clear { metric } => Some(*metric),
            ActionKind::DropApp => None,
        }
    }

    /// Verb half of the discriminator.
    pub fn verb(&self) -> &'static str {
        match self {
            ActionKind::Get { .. } => "get",
            ActionKind::RequestAll { .. } => "request_all",
            ActionKind::Ingest { .. } => "ingest",
            ActionKind::Clear { .. } => "clear",
            ActionKind::DropApp => "drop_app",
        }
    }

    /// Stable discriminator used for filtering, status text, and logging,
    /// e.g. `get:Sales`, `request_all:Traffic` or `drop_app`.
    pub fn type_name(&self) -> String {
        match self.metric() {
            Some(metric) => format!("{}:{metric}", self.verb()),
            None => self.verb().to_string(),
        }
    }

    /// Interactive reads jump ahead of background backfills.
    pub fn is_interactive(&self) -> bool {
        matches!(self, ActionKind::Get { .. })
    }
}

/// Counters reported by backfills and ingests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Upstream requests issued.
    pub fetched: u32,
    /// Rows written, sentinels included.
    pub written: u32,
    /// Sentinel rows among `written`.
    pub sentinels: u32,
}

/// Successful outcome of an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    /// Reconciled rows for a range read.
    Rows(Vec<Record>),
    /// Not enough cached data yet and partial results were not requested.
    /// Callers should try again later; this is not an error.
    NotReady,
    Synced(SyncSummary),
    Cleared,
    /// Number of tables dropped.
    Dropped(u32),
}

impl ActionOutput {
    pub fn rows(&self) -> Option<&[Record]> {
        match self {
            ActionOutput::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, ActionOutput::NotReady)
    }
}
