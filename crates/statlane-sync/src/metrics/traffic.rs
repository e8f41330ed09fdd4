//! Page traffic: one report per day, broken down by page category and feature.

use statlane_core::SyncSummary;

use crate::engine::MetricSync;
use crate::error::SyncResult;

/// Traffic has no end-of-data signal short of the page creation date, so
/// the walk always runs to it.
pub(crate) async fn request_all(sync: &MetricSync<'_>) -> SyncResult<SyncSummary> {
    sync.walk_back(None).await
}
