//! statlane-sync: metric synchronizers on top of the queue and the store.
//!
//! # Architecture
//!
//! ```text
//! MessageHandler ── Request ──► ActionQueue (single lane)
//!                                    │
//!                                    ▼
//!                               SyncEngine::process
//!                                    │
//!          ┌─────────────┬───────────┼────────────┬──────────────┐
//!          ▼             ▼           ▼            ▼              ▼
//!        Get        RequestAll     Ingest       Clear      (per app)
//!   gap detection   metrics::*    parse+merge   table     StoreSession
//!          │             │
//!          ▼             ▼
//!   Fetcher ─► FetchResponse::into_body ─► ReportParser ─► Parsed
//! ```
//!
//! Collaborators (fetching, parsing, application metadata, the calendar)
//! are traits so tests and other front ends can substitute them.

pub mod collaborators;
pub mod csv;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod http;
pub mod message;
mod metrics;

pub use collaborators::{
    AppDirectory, BoxFuture, Clock, Collaborators, FetchResponse, Fetcher, FixedClock, Parsed,
    ReportParser, StaticAppDirectory, SystemClock,
};
pub use csv::CsvReportParser;
pub use endpoints::Endpoints;
pub use engine::{SyncEngine, SyncSettings};
pub use error::{FetchError, SyncError, SyncResult};
pub use http::HttpFetcher;
pub use message::{MessageHandler, Request};
