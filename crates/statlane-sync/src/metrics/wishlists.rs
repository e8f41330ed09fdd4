//! Daily wishlist actions (adds, deletes, purchases, gifts).

use statlane_core::SyncSummary;

use crate::engine::MetricSync;
use crate::error::SyncResult;

pub(crate) async fn request_all(sync: &MetricSync<'_>) -> SyncResult<SyncSummary> {
    let limit = sync.settings().wishlist_empty_day_limit;
    sync.walk_back(Some(limit)).await
}
