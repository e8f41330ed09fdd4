//! Error types for the statlane store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("record for table {table} is missing key fields {key}")]
    MissingKey { table: String, key: String },

    /// Schema validation kept failing; persistent storage is unavailable.
    #[error(
        "persistent storage unavailable: schema validation failed after {attempts} attempts (last version {last_version})"
    )]
    SchemaUnavailable { attempts: u32, last_version: u64 },

    #[error("store session is closed")]
    Closed,
}

impl StoreError {
    /// Whether this error means the store can no longer be used at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::SchemaUnavailable { .. })
    }
}
