use std::path::Path;

use chrono::NaiveDate;
use serde_json::Value;

use statlane_core::{ActionKind, ActionOutput, Metric};

use crate::runtime::{Runtime, parse_app};

/// Print the rows of a range read as JSON, or `null` when not ready.
pub async fn get(
    config: &Path,
    app: &str,
    metric: Metric,
    start: NaiveDate,
    end: NaiveDate,
    partial: bool,
) -> anyhow::Result<()> {
    let rt = Runtime::load(config)?;
    let kind = ActionKind::Get {
        metric,
        date_start: start,
        date_end: end,
        return_lack_data: partial,
    };
    let output = rt.queue.insert_to_queue(rt.action(parse_app(app)?, kind)).await?;
    let json = match output {
        ActionOutput::Rows(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
        _ => Value::Null,
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
