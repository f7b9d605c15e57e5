// One search request per window, retried, with the cursor's verdict on
// how the chain continues.

use futures::FutureExt;
use showdown_ingest_core::{CursorStep, ReplaySummary, SearchCursor, SearchWindow};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::retry::with_retry_outcome;
use crate::{ReplaySource, RequestGate, RetryPolicy, SourceError};

/// A search page plus the follow-up decided by the cursor.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Newest first, as returned by the service.
    pub summaries: Vec<ReplaySummary>,
    pub next: CursorStep,
}

impl SearchPage {
    pub fn has_more(&self) -> bool {
        self.next.has_more()
    }
}

/// Result of searching one window.
#[derive(Debug)]
pub struct SearchCompletion {
    pub window: SearchWindow,
    pub attempts: u32,
    pub result: Result<SearchPage, SourceError>,
}

#[derive(Clone)]
pub struct SearchWorker {
    source: Arc<dyn ReplaySource>,
    gate: RequestGate,
    policy: RetryPolicy,
    cursor: Arc<SearchCursor>,
}

impl SearchWorker {
    pub fn new(
        source: Arc<dyn ReplaySource>,
        gate: RequestGate,
        policy: RetryPolicy,
        cursor: Arc<SearchCursor>,
    ) -> Self {
        Self {
            source,
            gate,
            policy,
            cursor,
        }
    }

    pub fn cursor(&self) -> &SearchCursor {
        &self.cursor
    }

    /// Search one window. A panic inside the source or the cursor comes back
    /// as [`SourceError::Panicked`], which ends the chain like any other
    /// exhausted search.
    pub async fn search(&self, window: SearchWindow) -> SearchCompletion {
        let outcome = AssertUnwindSafe(self.search_with_retry(&window))
            .catch_unwind()
            .await;
        match outcome {
            Ok((attempts, result)) => SearchCompletion {
                window,
                attempts,
                result,
            },
            Err(payload) => SearchCompletion {
                window,
                attempts: 1,
                result: Err(SourceError::from_panic(payload)),
            },
        }
    }

    async fn search_with_retry(
        &self,
        window: &SearchWindow,
    ) -> (u32, Result<SearchPage, SourceError>) {
        let gate = &self.gate;
        let source = &self.source;
        let outcome = with_retry_outcome(&self.policy, || gate.call(source.search(window))).await;

        let result = outcome.result.map(|summaries| {
            let next = self.cursor.advance(window, &summaries);
            SearchPage { summaries, next }
        });
        (outcome.attempts, result)
    }
}
