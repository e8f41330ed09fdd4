//! Application identifiers, metric tables, key shapes, and records.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::dates::parse_date;

/// A cached row: column name → scalar value.
pub type Record = Map<String, Value>;

/// Column marking a row as "confirmed no upstream data for this date".
pub const NO_DATA_FIELD: &str = "no_data";

/// Column every metric table uses for its calendar day.
pub const DATE_FIELD: &str = "date";

/// Errors produced while validating identifiers and metric names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("application id must not be empty")]
    EmptyAppId,

    #[error("application id {0:?} contains a reserved character ('/' or '#')")]
    ReservedChar(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),
}

// ── AppId ─────────────────────────────────────────────────────────

/// Opaque application identifier. Partitions all cached data and scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::EmptyAppId);
        }
        if id.contains('/') || id.contains('#') {
            return Err(TypeError::ReservedChar(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AppId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AppId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AppId> for String {
    fn from(id: AppId) -> Self {
        id.0
    }
}

// ── Metric ────────────────────────────────────────────────────────

/// The five analytics tables kept per application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Traffic,
    Sales,
    Reviews,
    Wishlists,
    WishlistConversions,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Traffic,
        Metric::Sales,
        Metric::Reviews,
        Metric::Wishlists,
        Metric::WishlistConversions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Traffic => "Traffic",
            Metric::Sales => "Sales",
            Metric::Reviews => "Reviews",
            Metric::Wishlists => "Wishlists",
            Metric::WishlistConversions => "WishlistConversions",
        }
    }

    /// The fixed table definition for this metric.
    pub fn table(&self) -> TableDef {
        match self {
            Metric::Reviews => TableDef::new(*self, KeyShape::field("recommendationid")),
            Metric::Wishlists => TableDef::new(*self, KeyShape::field(DATE_FIELD)),
            Metric::WishlistConversions => {
                TableDef::new(*self, KeyShape::composite(&[DATE_FIELD, "cohort_month"]))
            }
            Metric::Traffic => TableDef::new(
                *self,
                KeyShape::composite(&[DATE_FIELD, "page_category", "page_feature"]),
            ),
            Metric::Sales => TableDef::new(*self, KeyShape::field("id")).auto_increment(),
        }
    }

    /// Whether the upstream report for this metric is CSV (as opposed to HTML).
    pub fn expects_csv(&self) -> bool {
        !matches!(self, Metric::Reviews)
    }

    /// Logical table name for an application: `{appId}_{Metric}`.
    pub fn table_name(&self, app_id: &AppId) -> String {
        format!("{}_{}", app_id, self.name())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        Metric::ALL
            .into_iter()
            .find(|m| m.name().to_ascii_lowercase() == folded)
            .ok_or_else(|| TypeError::UnknownMetric(s.to_string()))
    }
}

// ── Key shapes ────────────────────────────────────────────────────

/// Key path of a table: a single field or an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyShape {
    Field(String),
    Composite(Vec<String>),
}

impl KeyShape {
    pub fn field(name: &str) -> Self {
        KeyShape::Field(name.to_string())
    }

    pub fn composite(names: &[&str]) -> Self {
        KeyShape::Composite(names.iter().map(|n| n.to_string()).collect())
    }

    /// Field names in key order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            KeyShape::Field(name) => vec![name.as_str()],
            KeyShape::Composite(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Extract the key of a record, or `None` if any key field is missing or null.
    pub fn key_of(&self, record: &Record) -> Option<KeyValue> {
        let mut parts = Vec::new();
        for field in self.fields() {
            match record.get(field) {
                Some(Value::Null) | None => return None,
                Some(v) => parts.push(v.clone()),
            }
        }
        Some(KeyValue(parts))
    }
}

impl fmt::Display for KeyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyShape::Field(name) => f.write_str(name),
            KeyShape::Composite(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

/// The value of a record's key, one entry per key field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue(pub Vec<Value>);

impl KeyValue {
    pub fn single(value: impl Into<Value>) -> Self {
        KeyValue(vec![value.into()])
    }

    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Canonical storage encoding. Dates lead composite keys, so storage order
    /// follows date order for every date-keyed table.
    pub fn encode(&self) -> String {
        match self.0.as_slice() {
            [single] => single.to_string(),
            parts => Value::Array(parts.to_vec()).to_string(),
        }
    }
}

// ── Table definitions ─────────────────────────────────────────────

/// Fixed metadata describing one metric table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub metric: Metric,
    pub key: KeyShape,
    /// When set, rows without a key get the next sequence number.
    pub auto_increment: bool,
    pub date_field: &'static str,
}

impl TableDef {
    pub fn new(metric: Metric, key: KeyShape) -> Self {
        Self {
            metric,
            key,
            auto_increment: false,
            date_field: DATE_FIELD,
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// All five built-in definitions.
    pub fn builtin() -> Vec<TableDef> {
        Metric::ALL.iter().map(Metric::table).collect()
    }

    /// The calendar day a record belongs to, if it carries a valid one.
    pub fn date_of(&self, record: &Record) -> Option<NaiveDate> {
        record
            .get(self.date_field)
            .and_then(Value::as_str)
            .and_then(|s| parse_date(s).ok())
    }
}

/// Whether a row is a "confirmed no data" sentinel.
pub fn is_sentinel(record: &Record) -> bool {
    record
        .get(NO_DATA_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn app_id_rejects_empty_and_reserved() {
        assert_eq!(AppId::new(""), Err(TypeError::EmptyAppId));
        assert!(matches!(AppId::new("a/b"), Err(TypeError::ReservedChar(_))));
        assert!(matches!(AppId::new("a#b"), Err(TypeError::ReservedChar(_))));
        assert_eq!(AppId::new("440").unwrap().as_str(), "440");
    }

    #[test]
    fn metric_parses_loosely() {
        assert_eq!("Sales".parse::<Metric>().unwrap(), Metric::Sales);
        assert_eq!("traffic".parse::<Metric>().unwrap(), Metric::Traffic);
        assert_eq!(
            "wishlist_conversions".parse::<Metric>().unwrap(),
            Metric::WishlistConversions
        );
        assert!("refunds".parse::<Metric>().is_err());
    }

    #[test]
    fn table_name_joins_app_and_metric() {
        let app = AppId::new("570").unwrap();
        assert_eq!(Metric::Wishlists.table_name(&app), "570_Wishlists");
    }

    #[test]
    fn builtin_key_shapes() {
        assert_eq!(Metric::Reviews.table().key, KeyShape::field("recommendationid"));
        assert_eq!(Metric::Wishlists.table().key, KeyShape::field("date"));
        assert_eq!(
            Metric::Traffic.table().key.fields(),
            vec!["date", "page_category", "page_feature"]
        );
        assert!(Metric::Sales.table().auto_increment);
        assert!(!Metric::Traffic.table().auto_increment);
    }

    #[test]
    fn key_of_requires_every_field() {
        let shape = KeyShape::composite(&["date", "cohort_month"]);
        let full = record(json!({"date": "2024-01-01", "cohort_month": "2023-12", "n": 3}));
        let partial = record(json!({"date": "2024-01-01"}));
        let null = record(json!({"date": "2024-01-01", "cohort_month": null}));

        assert_eq!(
            shape.key_of(&full).unwrap().encode(),
            r#"["2024-01-01","2023-12"]"#
        );
        assert!(shape.key_of(&partial).is_none());
        assert!(shape.key_of(&null).is_none());
    }

    #[test]
    fn single_key_encodes_as_scalar_json() {
        assert_eq!(KeyValue::single("2024-01-01").encode(), r#""2024-01-01""#);
        assert_eq!(KeyValue::single(7).encode(), "7");
    }

    #[test]
    fn date_of_and_sentinel() {
        let def = Metric::Wishlists.table();
        let row = record(json!({"date": "2024-02-29", "no_data": true}));
        assert_eq!(def.date_of(&row), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert!(is_sentinel(&row));
        assert!(!is_sentinel(&record(json!({"date": "2024-02-29"}))));
        assert_eq!(def.date_of(&record(json!({"date": "yesterday"}))), None);
    }
}
