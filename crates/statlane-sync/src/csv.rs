//! Header-driven report parser.
//!
//! Reads a CSV report whose first non-comment line is the header, or a JSON
//! array of objects (optionally wrapped in `{"reviews": [...]}`). Column
//! names become snake_case record fields. Numeric cells become numbers,
//! except in columns that key a table. A body whose header lacks the
//! columns that identify a row is not a report and fails to parse.

use serde_json::{Number, Value};

use statlane_core::{KeyShape, Metric, Record, TableDef};

use crate::collaborators::{Parsed, ReportParser};
use crate::error::{SyncError, SyncResult};

/// Bodies the portal sends instead of a report when a window is not
/// processed yet.
const NO_DATA_MARKERS: &[&str] = &["no data", "no data available", "no data yet"];

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvReportParser;

impl ReportParser for CsvReportParser {
    fn parse(&self, raw: &str, metric: Metric) -> SyncResult<Parsed> {
        let body = raw.trim_start_matches('\u{feff}').trim();
        let lowered = body.to_ascii_lowercase();
        if body.is_empty() || NO_DATA_MARKERS.contains(&lowered.trim_end_matches('.')) {
            return Ok(Parsed::NoData);
        }
        if body.starts_with('<') {
            return Err(SyncError::Parse {
                metric,
                message: "received an HTML page instead of a report".to_string(),
            });
        }
        let rows = if body.starts_with('[') || body.starts_with('{') {
            parse_json(body, metric)?
        } else {
            parse_csv(body, metric)?
        };
        Ok(Parsed::Rows(rows))
    }
}

fn parse_json(body: &str, metric: Metric) -> SyncResult<Vec<Record>> {
    let parse_err = |message: String| SyncError::Parse { metric, message };
    let value: Value = serde_json::from_str(body).map_err(|e| parse_err(e.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("reviews") {
            Some(Value::Array(items)) => items,
            _ => return Err(parse_err("expected an array of rows".to_string())),
        },
        _ => return Err(parse_err("expected an array of rows".to_string())),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(obj) => Ok(obj
                .into_iter()
                .map(|(k, v)| (snake_case(&k), v))
                .collect()),
            other => Err(parse_err(format!("row is not an object: {other}"))),
        })
        .collect()
}

fn parse_csv(body: &str, metric: Metric) -> SyncResult<Vec<Record>> {
    let mut lines = body
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = split_line(header).iter().map(|c| snake_case(c)).collect();
    let table = metric.table();
    if let Some(missing) = required_columns(&table)
        .into_iter()
        .find(|field| !columns.iter().any(|c| c == field))
    {
        return Err(SyncError::Parse {
            metric,
            message: format!("header has no {missing} column"),
        });
    }
    let key_fields = table.key.fields();

    let mut rows = Vec::new();
    for (index, line) in lines.enumerate() {
        let cells = split_line(line);
        if cells.len() != columns.len() {
            return Err(SyncError::Parse {
                metric,
                message: format!(
                    "row {} has {} cells, header has {}",
                    index + 1,
                    cells.len(),
                    columns.len()
                ),
            });
        }
        let row: Record = columns
            .iter()
            .zip(cells)
            .map(|(column, cell)| {
                let value = if key_fields.contains(&column.as_str()) {
                    Value::String(cell)
                } else {
                    cell_value(cell)
                };
                (column.clone(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Columns a report must carry for its rows to be placed in the table.
/// Non-date parts of composite keys may be absent and default to empty.
fn required_columns(table: &TableDef) -> Vec<&str> {
    match &table.key {
        KeyShape::Field(field) if !table.auto_increment => vec![field.as_str()],
        _ => vec![table.date_field],
    }
}

/// Split one CSV line, honouring double-quoted cells with `""` escapes.
fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell)),
            c => cell.push(c),
        }
    }
    cells.push(cell);
    cells.into_iter().map(|c| c.trim().to_string()).collect()
}

fn cell_value(cell: String) -> Value {
    if let Ok(n) = cell.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(cell)
}

/// `"Page Category"` → `page_category`, `"Net Units Sold"` → `net_units_sold`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_lower = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
