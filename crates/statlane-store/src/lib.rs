//! statlane-store: schema-healing persistent store for metric tables.
//!
//! Backed by [redb](https://docs.rs/redb). One database holds every
//! application's tables; a [`StoreSession`] is the per-application handle.
//!
//! # Architecture
//!
//! ```text
//! StatsDatabase (Arc<redb::Database>)
//!   ├── __meta      version index, auto-increment counters
//!   ├── __catalog   {appId}_{Metric} → TableBinding (physical name, key shape)
//!   └── data tables {appId}_{Metric}[#v{version}] → JSON records
//!
//! StoreSession (one per application)
//!   Closed → Opening → Validating → Ready
//!                 ↘ Upgrading ↗     ↘ Retrying (version + 1) → Opening
//! ```
//!
//! Records are JSON objects keyed by the canonical encoding of their table's
//! key fields. A table whose stored key shape no longer matches its
//! definition is never dropped; healing binds a fresh physical table under a
//! higher version index instead.

pub mod error;
pub mod merge;
pub mod schema;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use merge::merge_record;
pub use schema::{StoreState, TableBinding};
pub use store::{SessionOptions, StatsDatabase, StoreSession};
