//! Core types for showdown-ingest
//!
//! Pure data model and decision logic shared by the client, batch and
//! storage crates. Nothing in here performs I/O.

pub mod cursor;
pub mod dedup;
pub mod types;

pub use cursor::{ChainStop, CursorStep, SearchCursor};
pub use dedup::{filter_known, DedupFilter};
pub use types::{KnownIdSet, ReplayId, ReplayRecord, ReplaySummary, SearchWindow, TimeRange};
