//! Wishlist-to-purchase conversions by cohort month.

use statlane_core::SyncSummary;

use crate::engine::MetricSync;
use crate::error::SyncResult;

pub(crate) async fn request_all(sync: &MetricSync<'_>) -> SyncResult<SyncSummary> {
    sync.replace_history().await
}
