//! Durable replay storage
//!
//! A single `replays` table keyed by replay id. Writes are insert-or-ignore,
//! so the table's primary key is the final dedup authority and re-ingesting
//! the same replay is a no-op.

mod error;
mod sqlite;

pub use error::{ErrorCode, Result, StorageError};
pub use sqlite::ReplayStore;

use async_trait::async_trait;
use showdown_ingest_core::ReplayRecord;

/// Destination for flushed replay batches.
#[async_trait]
pub trait ReplaySink: Send + Sync {
    /// Write `records` in one transaction, ignoring ids that already exist.
    ///
    /// Returns the number of rows actually inserted. On error nothing from
    /// the batch is committed.
    async fn write_batch(&self, records: &[ReplayRecord]) -> Result<usize>;
}

#[async_trait]
impl ReplaySink for ReplayStore {
    async fn write_batch(&self, records: &[ReplayRecord]) -> Result<usize> {
        self.insert_batch(records.to_vec()).await
    }
}
