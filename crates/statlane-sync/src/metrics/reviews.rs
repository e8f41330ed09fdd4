//! User reviews, keyed by review id.
//!
//! The export covers the whole history. Reviews are merged by id so that
//! fields added by later exports (vote counts, developer replies) enrich
//! rows already stored.

use chrono::DateTime;
use serde_json::Value;

use statlane_core::{DATE_FIELD, Record, SyncSummary, format_date, is_sentinel};

use crate::collaborators::Parsed;
use crate::engine::MetricSync;
use crate::error::SyncResult;

const ID_FIELD: &str = "recommendationid";
const CREATED_FIELD: &str = "timestamp_created";

pub(crate) async fn request_all(sync: &MetricSync<'_>) -> SyncResult<SyncSummary> {
    let floor = sync.page_creation_date()?;
    let mut summary = SyncSummary::default();
    let Some(yesterday) = sync.yesterday().filter(|y| *y >= floor) else {
        return Ok(summary);
    };

    summary.fetched = 1;
    let mut rows = match sync.fetch(floor, yesterday).await? {
        Parsed::Rows(rows) => sync.normalize(rows, None),
        Parsed::NoData => return Ok(summary),
    };

    let reviewed: Vec<_> = sync
        .dates_of(&rows)
        .into_iter()
        .filter(|day| *day >= floor && *day <= yesterday)
        .collect();
    sync.store
        .delete_keys(sync.metric, &sync.sentinel_keys(reviewed))
        .await?;

    let sentinels = sync.gap_sentinels(&rows, floor, yesterday);
    summary.sentinels = sentinels.len() as u32;
    rows.extend(sentinels);
    summary.written = sync.store.merge_upsert(sync.metric, &rows).await? as u32;
    Ok(summary)
}

/// Give a review row a string id and a `date` derived from its creation
/// timestamp when the export does not carry one.
pub(crate) fn normalize(row: &mut Record) {
    if is_sentinel(row) {
        return;
    }
    if let Some(Value::Number(id)) = row.get(ID_FIELD) {
        let id = id.to_string();
        row.insert(ID_FIELD.to_string(), Value::String(id));
    }
    if !row.contains_key(DATE_FIELD) {
        let created = row
            .get(CREATED_FIELD)
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        if let Some(created) = created {
            row.insert(
                DATE_FIELD.to_string(),
                Value::String(format_date(created.date_naive())),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn date_derived_from_creation_timestamp() {
        // 2024-01-02T00:00:00Z
        let mut row = record(json!({"recommendationid": 9, "timestamp_created": 1704153600}));
        normalize(&mut row);
        assert_eq!(row["recommendationid"], json!("9"));
        assert_eq!(row["date"], json!("2024-01-02"));
    }

    #[test]
    fn explicit_date_wins() {
        let mut row = record(json!({
            "recommendationid": "9",
            "date": "2023-05-05",
            "timestamp_created": 1704153600
        }));
        normalize(&mut row);
        assert_eq!(row["date"], json!("2023-05-05"));
    }
}
