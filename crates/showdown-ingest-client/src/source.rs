use async_trait::async_trait;
use showdown_ingest_core::{ReplayRecord, ReplaySummary, SearchWindow};

use crate::SourceError;

/// The remote replay service: a paged search endpoint and a per-id fetch
/// endpoint. Implemented over HTTP by [`ShowdownClient`](crate::ShowdownClient)
/// and by simulated services in tests.
#[async_trait]
pub trait ReplaySource: Send + Sync + 'static {
    /// One page of summaries strictly older than `window.before`,
    /// newest first.
    async fn search(&self, window: &SearchWindow) -> Result<Vec<ReplaySummary>, SourceError>;

    /// The full replay for `id`.
    async fn fetch(&self, id: &str) -> Result<ReplayRecord, SourceError>;
}

