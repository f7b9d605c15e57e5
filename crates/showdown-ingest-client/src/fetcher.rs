// Bounded, rate-limited replay fetching.
//
// Each accepted id runs on its own task; results come back over a single
// completion channel owned by the fetcher. In-flight bookkeeping is only
// touched by the owner, never by the worker tasks.

use futures::stream::{self, Stream};
use futures::FutureExt;
use showdown_ingest_core::{ReplayId, ReplayRecord};
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::retry::{with_retry_outcome, RetryOutcome};
use crate::{ReplaySource, RequestGate, RetryPolicy, SourceError};

/// Final result of fetching one id.
#[derive(Debug)]
pub struct FetchOutcome {
    pub id: ReplayId,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub elapsed: Duration,
    pub result: Result<ReplayRecord, SourceError>,
}

impl FetchOutcome {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fetches a single id under the shared gate and retry policy.
#[derive(Clone)]
pub struct FetchWorker {
    source: Arc<dyn ReplaySource>,
    gate: RequestGate,
    policy: RetryPolicy,
}

impl FetchWorker {
    pub fn new(source: Arc<dyn ReplaySource>, gate: RequestGate, policy: RetryPolicy) -> Self {
        Self {
            source,
            gate,
            policy,
        }
    }

    /// Fetch `id` with retries. A panic inside the source ends the fetch
    /// with [`SourceError::Panicked`] instead of unwinding into the caller.
    pub async fn fetch(&self, id: ReplayId) -> FetchOutcome {
        let started = Instant::now();
        let outcome = match AssertUnwindSafe(self.fetch_with_retry(&id))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => RetryOutcome {
                result: Err(SourceError::from_panic(payload)),
                attempts: 1,
                elapsed: started.elapsed(),
            },
        };

        if let Err(err) = &outcome.result {
            warn!(
                replay_id = %id,
                attempts = outcome.attempts,
                error = %err,
                "Replay fetch failed permanently"
            );
        }

        FetchOutcome {
            id,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            result: outcome.result,
        }
    }

    async fn fetch_with_retry(&self, id: &str) -> RetryOutcome<ReplayRecord, SourceError> {
        let gate = &self.gate;
        let source = &self.source;
        with_retry_outcome(&self.policy, || gate.call(source.fetch(id))).await
    }
}

/// Answer to [`RateLimitedFetcher::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// `max_in_flight` fetches are already running
    AtCapacity,
    /// The same id is already being fetched
    AlreadyInFlight,
}

/// Runs at most `max_in_flight` fetches at once and hands back outcomes in
/// completion order.
pub struct RateLimitedFetcher {
    worker: FetchWorker,
    max_in_flight: usize,
    in_flight: HashSet<ReplayId>,
    peak_in_flight: usize,
    tx: mpsc::UnboundedSender<FetchOutcome>,
    rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

impl RateLimitedFetcher {
    pub fn new(worker: FetchWorker, max_in_flight: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            worker,
            max_in_flight: max_in_flight.max(1),
            in_flight: HashSet::new(),
            peak_in_flight: 0,
            tx,
            rx,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Highest number of concurrent fetches seen so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.max_in_flight
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Start fetching `id` if there is room and it is not already running.
    /// Must be called from within a tokio runtime.
    pub fn submit(&mut self, id: ReplayId) -> Submission {
        if self.in_flight.contains(&id) {
            return Submission::AlreadyInFlight;
        }
        if !self.has_capacity() {
            return Submission::AtCapacity;
        }

        self.in_flight.insert(id.clone());
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight.len());

        let worker = self.worker.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = worker.fetch(id).await;
            // Receiver gone means the fetcher was dropped; nothing to report to.
            let _ = tx.send(outcome);
        });

        Submission::Accepted
    }

    /// Next finished fetch, or `None` when nothing is in flight.
    ///
    /// Cancel safe: dropping the future before it resolves loses nothing.
    pub async fn next_outcome(&mut self) -> Option<FetchOutcome> {
        if self.in_flight.is_empty() {
            return None;
        }

        let outcome = self.rx.recv().await?;
        self.in_flight.remove(&outcome.id);
        debug!(
            replay_id = %outcome.id,
            attempts = outcome.attempts,
            in_flight = self.in_flight.len(),
            "Fetch completed"
        );
        Some(outcome)
    }

    /// Fetch every id in `ids` and yield outcomes as they complete.
    ///
    /// Keeps the fetcher saturated up to its bound. Ids repeated while still
    /// in flight are fetched once.
    pub fn fetch_stream<I>(self, ids: I) -> impl Stream<Item = FetchOutcome>
    where
        I: IntoIterator<Item = ReplayId>,
    {
        let pending: VecDeque<ReplayId> = ids.into_iter().collect();
        stream::unfold((self, pending), |(mut fetcher, mut pending)| async move {
            while fetcher.has_capacity() {
                let Some(id) = pending.pop_front() else {
                    break;
                };
                fetcher.submit(id);
            }
            let outcome = fetcher.next_outcome().await?;
            Some((outcome, (fetcher, pending)))
        })
    }
}

impl std::fmt::Debug for RateLimitedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedFetcher")
            .field("max_in_flight", &self.max_in_flight)
            .field("in_flight", &self.in_flight.len())
            .field("peak_in_flight", &self.peak_in_flight)
            .finish()
    }
}
