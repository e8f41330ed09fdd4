//! Package sales. The history report is fully re-derivable, so every
//! backfill replaces the table. Rows are keyed by a store-assigned sequence.

use statlane_core::SyncSummary;

use crate::engine::MetricSync;
use crate::error::SyncResult;

pub(crate) async fn request_all(sync: &MetricSync<'_>) -> SyncResult<SyncSummary> {
    sync.replace_history().await
}
