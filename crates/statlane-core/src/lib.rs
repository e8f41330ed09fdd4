//! statlane-core: shared types for the statlane workspace.
//!
//! Holds the application identifier, the five metric tables and their key
//! shapes, the loosely-typed [`Record`] rows every table stores, calendar-day
//! helpers, the action vocabulary shared by the queue and the synchronizers,
//! and the `statlane.toml` configuration.

pub mod action;
pub mod config;
pub mod dates;
pub mod types;

pub use action::{ActionKind, ActionOutput, SyncSummary};
pub use config::StatlaneConfig;
pub use dates::{DateError, format_date, parse_date};
pub use types::*;
