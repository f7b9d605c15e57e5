// Ingestion control loop
//
// One task owns every queue and counter. Searches and fetches run on
// spawned tasks and report back over completion channels; the loop is the
// only consumer. Phases: SEEDING -> RUNNING -> DRAINING -> DONE.

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use showdown_ingest_batch::{BatchConfig, PersistenceBatcher};
use showdown_ingest_client::{
    FetchOutcome, FetchWorker, RateLimitedFetcher, ReplaySource, RequestGate, RetryPolicy,
    SearchCompletion, SearchWorker, ShowdownClient, Submission,
};
use showdown_ingest_config::IngestConfig;
use showdown_ingest_core::{
    ChainStop, CursorStep, DedupFilter, KnownIdSet, ReplayId, SearchCursor, SearchWindow, TimeRange,
};
use showdown_ingest_storage::{ReplaySink, ReplayStore};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::report::{FailedFetch, IngestReport};

const FLUSH_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Drives search, dedup, fetch and persistence for one ingestion window.
pub struct Orchestrator {
    config: IngestConfig,
    source: Arc<dyn ReplaySource>,
    sink: Arc<dyn ReplaySink>,
    known: KnownIdSet,
}

impl Orchestrator {
    pub fn new(
        config: IngestConfig,
        source: Arc<dyn ReplaySource>,
        sink: Arc<dyn ReplaySink>,
        known: KnownIdSet,
    ) -> Self {
        Self {
            config,
            source,
            sink,
            known,
        }
    }

    /// Persist into `store`, skipping every id it already holds.
    pub async fn with_store(
        config: IngestConfig,
        source: Arc<dyn ReplaySource>,
        store: ReplayStore,
    ) -> Result<Self> {
        let known = store
            .known_ids()
            .await
            .context("Failed to load known replay ids")?;
        info!(
            known = known.len(),
            database = store.location(),
            "Loaded known replay ids"
        );
        Ok(Self::new(config, source, Arc::new(store), known))
    }

    /// Talk to the configured replay service and database.
    pub async fn from_config(config: IngestConfig) -> Result<Self> {
        let client = ShowdownClient::new(config.search.base_url.clone(), config.fetch.timeout())
            .context("Failed to build HTTP client")?;
        let store = ReplayStore::open(&config.storage.database)
            .with_context(|| format!("Failed to open database {}", config.storage.database))?;
        Self::with_store(config, Arc::new(client), store).await
    }

    pub async fn run(self) -> Result<IngestReport> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the window is exhausted or `shutdown` resolves.
    ///
    /// On shutdown the buffered records get one flush attempt and the
    /// report comes back with `interrupted` set. Queued and in-flight
    /// fetches are abandoned; a rerun picks them up through the known ids.
    pub async fn run_until<F>(self, shutdown: F) -> Result<IngestReport>
    where
        F: Future<Output = ()>,
    {
        let window = TimeRange::new(
            self.config.window.start_timestamp()?,
            self.config.window.end_timestamp()?,
        );
        if window.start >= window.end {
            return Err(anyhow!(
                "window start ({}) must be earlier than end ({})",
                self.config.window.start,
                self.config.window.end
            ));
        }

        let mut pipeline = Pipeline::new(self, window);
        tokio::pin!(shutdown);
        pipeline.drive(shutdown).await?;
        Ok(pipeline.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeding,
    Running,
    Draining,
    Done,
}

/// Queues and counters owned by the control loop.
struct IngestionState {
    phase: Phase,
    pending_searches: VecDeque<SearchWindow>,
    searches_in_flight: usize,
    fetch_queue: VecDeque<ReplayId>,
    queued: HashSet<ReplayId>,
}

enum Event {
    Search(SearchCompletion),
    Fetch(FetchOutcome),
    FlushDue,
    Progress,
    Shutdown,
}

struct Pipeline {
    sink: Arc<dyn ReplaySink>,
    dedup: DedupFilter,
    searcher: SearchWorker,
    fetcher: RateLimitedFetcher,
    batcher: PersistenceBatcher,
    state: IngestionState,
    search_tx: mpsc::UnboundedSender<SearchCompletion>,
    search_rx: mpsc::UnboundedReceiver<SearchCompletion>,
    warmup_pages: usize,
    flush_backoff: RetryPolicy,
    flush_max_attempts: u32,
    consecutive_flush_failures: u32,
    flush_retry_at: Option<Instant>,
    progress: Interval,
    report: IngestReport,
    started: Instant,
}

impl Pipeline {
    fn new(orchestrator: Orchestrator, window: TimeRange) -> Self {
        let Orchestrator {
            config,
            source,
            sink,
            known,
        } = orchestrator;

        let cursor = Arc::new(SearchCursor::new(
            window,
            config.search.chains,
            config.search.format_filter().map(str::to_string),
            config.search.user_filter().map(str::to_string),
        ));
        let gate = RequestGate::new(config.fetch.rate_limit, config.fetch.timeout());
        let policy = RetryPolicy::new(config.fetch.max_attempts, config.fetch.initial_backoff());

        let searcher = SearchWorker::new(
            Arc::clone(&source),
            gate.clone(),
            policy.clone(),
            Arc::clone(&cursor),
        );
        let fetcher =
            RateLimitedFetcher::new(FetchWorker::new(source, gate, policy), config.fetch.pool_size);
        let batcher = PersistenceBatcher::new(BatchConfig::new(
            config.batch.max_records,
            config.batch.max_age(),
        ));

        let flush_backoff = RetryPolicy {
            max_delay: FLUSH_BACKOFF_MAX,
            ..RetryPolicy::new(config.storage.flush_max_attempts, Duration::from_millis(500))
        };

        let period = config.log.progress_interval();
        let mut progress = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (search_tx, search_rx) = mpsc::unbounded_channel();

        info!(
            start = window.start,
            end = window.end,
            chains = cursor.chain_count(),
            format = ?config.search.format_filter(),
            pool_size = fetcher.max_in_flight(),
            known = known.len(),
            "Starting ingestion"
        );

        Self {
            sink,
            dedup: DedupFilter::new(known),
            searcher,
            fetcher,
            batcher,
            state: IngestionState {
                phase: Phase::Seeding,
                pending_searches: cursor.seed().into(),
                searches_in_flight: 0,
                fetch_queue: VecDeque::new(),
                queued: HashSet::new(),
            },
            search_tx,
            search_rx,
            warmup_pages: config.fetch.warmup_pages,
            flush_backoff,
            flush_max_attempts: config.storage.flush_max_attempts.max(1),
            consecutive_flush_failures: 0,
            flush_retry_at: None,
            progress,
            report: IngestReport::default(),
            started: Instant::now(),
        }
    }

    async fn drive<F>(&mut self, mut shutdown: Pin<&mut F>) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        loop {
            self.submit_searches();
            self.advance_phase();
            self.top_up_fetches();

            if self.flush_wanted(Instant::now()) {
                self.flush().await?;
            }

            if self.is_complete() {
                self.state.phase = Phase::Done;
                info!("Ingestion complete");
                return Ok(());
            }

            let flush_wait = self.flush_wait(Instant::now());
            let event = tokio::select! {
                Some(completion) = self.search_rx.recv(), if self.state.searches_in_flight > 0 => {
                    Event::Search(completion)
                }
                Some(outcome) = self.fetcher.next_outcome(), if self.fetcher.in_flight() > 0 => {
                    Event::Fetch(outcome)
                }
                _ = tokio::time::sleep(flush_wait) => Event::FlushDue,
                _ = self.progress.tick() => Event::Progress,
                _ = shutdown.as_mut() => Event::Shutdown,
            };

            match event {
                Event::Search(completion) => self.on_search(completion),
                Event::Fetch(outcome) => self.on_fetch(outcome),
                // Picked up by the flush check at the top of the loop
                Event::FlushDue => {}
                Event::Progress => self.log_progress(),
                Event::Shutdown => return self.interrupt().await,
            }
        }
    }

    fn submit_searches(&mut self) {
        while let Some(window) = self.state.pending_searches.pop_front() {
            debug!(chain = window.chain, before = window.before, "Submitting search");
            let worker = self.searcher.clone();
            let tx = self.search_tx.clone();
            self.state.searches_in_flight += 1;
            tokio::spawn(async move {
                let completion = worker.search(window).await;
                let _ = tx.send(completion);
            });
        }
    }

    fn advance_phase(&mut self) {
        if self.state.phase == Phase::Seeding {
            self.state.phase = Phase::Running;
        }

        if self.state.phase == Phase::Running
            && self.state.pending_searches.is_empty()
            && self.state.searches_in_flight == 0
        {
            self.state.phase = Phase::Draining;
            info!(
                pages = self.report.pages_searched,
                queued = self.state.fetch_queue.len(),
                in_flight = self.fetcher.in_flight(),
                "Search exhausted, draining fetches"
            );
        }
    }

    /// Fetching waits for `warmup_pages` search results unless searching
    /// is already over.
    fn fetching_open(&self) -> bool {
        self.state.phase == Phase::Draining
            || self.report.pages_searched + self.report.failed_searches >= self.warmup_pages
    }

    fn top_up_fetches(&mut self) {
        if !self.fetching_open() {
            return;
        }

        while self.fetcher.has_capacity() {
            let Some(id) = self.state.fetch_queue.pop_front() else {
                break;
            };
            self.state.queued.remove(&id);
            match self.fetcher.submit(id.clone()) {
                Submission::Accepted => {}
                Submission::AlreadyInFlight => self.report.skipped_in_flight += 1,
                Submission::AtCapacity => {
                    self.state.queued.insert(id.clone());
                    self.state.fetch_queue.push_front(id);
                    break;
                }
            }
        }
    }

    fn on_search(&mut self, completion: SearchCompletion) {
        self.state.searches_in_flight = self.state.searches_in_flight.saturating_sub(1);
        let chain = completion.window.chain;

        let page = match completion.result {
            Ok(page) => page,
            Err(error) => {
                self.report.failed_searches += 1;
                counter!("ingest.search.failed", 1);
                warn!(
                    chain,
                    before = completion.window.before,
                    attempts = completion.attempts,
                    error = %error,
                    "Search failed, stopping chain"
                );
                self.report.chain_stops.push((chain, ChainStop::SearchFailed));
                return;
            }
        };

        self.report.pages_searched += 1;
        self.report.summaries_seen += page.summaries.len();
        counter!("ingest.search.pages", 1);

        let (eligible, ineligible): (Vec<_>, Vec<_>) = page
            .summaries
            .into_iter()
            .partition(|summary| summary.is_eligible());
        self.report.skipped_ineligible += ineligible.len();

        let candidates = eligible.len();
        let fresh = self.dedup.filter(eligible);
        self.report.skipped_known += candidates - fresh.len();

        let mut queued = 0;
        for summary in fresh {
            if self.state.queued.contains(&summary.id) || self.fetcher.is_in_flight(&summary.id) {
                self.report.skipped_in_flight += 1;
                continue;
            }
            self.state.queued.insert(summary.id.clone());
            self.state.fetch_queue.push_back(summary.id);
            queued += 1;
        }

        debug!(
            chain,
            before = completion.window.before,
            candidates,
            queued,
            has_more = page.next.has_more(),
            "Search page processed"
        );

        match page.next {
            CursorStep::Continue(next) => self.state.pending_searches.push_back(next),
            CursorStep::Stop(reason) => {
                info!(chain, reason = %reason, "Search chain finished");
                self.report.chain_stops.push((chain, reason));
            }
        }
    }

    fn on_fetch(&mut self, outcome: FetchOutcome) {
        let retries = outcome.retries();
        if retries > 0 {
            self.report.retried_fetches += 1;
            self.report.fetch_retries += u64::from(retries);
            counter!("ingest.fetch.retries", u64::from(retries));
        }
        histogram!("ingest.fetch.seconds", outcome.elapsed.as_secs_f64());

        match outcome.result {
            Ok(record) => {
                self.report.fetched += 1;
                counter!("ingest.fetch.completed", 1);
                self.batcher.enqueue(record);
            }
            Err(error) => {
                counter!("ingest.fetch.failed", 1, "kind" => error.kind());
                self.report.failed.push(FailedFetch {
                    id: outcome.id,
                    attempts: outcome.attempts,
                    error,
                });
            }
        }
    }

    fn fetch_work_done(&self) -> bool {
        self.state.fetch_queue.is_empty() && self.fetcher.in_flight() == 0
    }

    fn flush_wanted(&self, now: Instant) -> bool {
        if self.flush_retry_at.is_some_and(|at| now < at) {
            return false;
        }
        if self.flush_retry_at.is_some() {
            return true;
        }
        let draining_tail = self.state.phase == Phase::Draining
            && self.fetch_work_done()
            && !self.batcher.is_empty();
        draining_tail || self.batcher.should_flush_at(now)
    }

    fn flush_wait(&self, now: Instant) -> Duration {
        match self.flush_retry_at {
            Some(at) => at.saturating_duration_since(now),
            None => self.batcher.time_until_due(now),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let buffered = self.batcher.len();
        match self.batcher.flush(self.sink.as_ref()).await {
            Ok(report) => {
                self.consecutive_flush_failures = 0;
                self.flush_retry_at = None;
                if report.written > 0 {
                    self.report.flushes += 1;
                    self.report.rows_inserted += report.inserted;
                    self.report.rows_ignored += report.ignored();
                    counter!("ingest.flush.rows", report.inserted as u64);
                    info!(
                        rows = report.written,
                        inserted = report.inserted,
                        ignored = report.ignored(),
                        total = self.report.rows_inserted,
                        "Flushed replays"
                    );
                }
                Ok(())
            }
            Err(error) => {
                self.report.flush_failures += 1;
                self.consecutive_flush_failures += 1;
                counter!("ingest.flush.failed", 1);

                if self.consecutive_flush_failures >= self.flush_max_attempts {
                    return Err(anyhow::Error::new(error).context(format!(
                        "Giving up after {} consecutive failed flushes; {} buffered replays were not written",
                        self.consecutive_flush_failures, buffered
                    )));
                }

                let delay = self
                    .flush_backoff
                    .delay_for_attempt(self.consecutive_flush_failures - 1);
                warn!(
                    error = %error,
                    buffered,
                    attempt = self.consecutive_flush_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Flush failed, keeping buffer for retry"
                );
                self.flush_retry_at = Some(Instant::now() + delay);
                Ok(())
            }
        }
    }

    /// Stop early, giving whatever is buffered one chance to be written.
    async fn interrupt(&mut self) -> Result<()> {
        self.report.interrupted = true;
        warn!(
            buffered = self.batcher.len(),
            queued = self.state.fetch_queue.len(),
            in_flight = self.fetcher.in_flight(),
            pending_searches = self.state.pending_searches.len() + self.state.searches_in_flight,
            "Shutdown requested, flushing buffered replays"
        );

        if !self.batcher.is_empty() {
            self.flush().await?;
        }
        if !self.batcher.is_empty() {
            warn!(
                lost = self.batcher.len(),
                "Final flush failed; buffered replays were not written"
            );
        }
        self.state.phase = Phase::Done;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.state.phase == Phase::Draining && self.fetch_work_done() && self.batcher.is_empty()
    }

    fn log_progress(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.report.rows_inserted as f64 / elapsed
        } else {
            0.0
        };
        info!(
            phase = ?self.state.phase,
            persisted = self.report.rows_inserted,
            fetched = self.report.fetched,
            failed = self.report.failed.len(),
            queued = self.state.fetch_queue.len(),
            in_flight = self.fetcher.in_flight(),
            buffered = self.batcher.len(),
            elapsed_secs = elapsed as u64,
            per_sec = (rate * 10.0).round() / 10.0,
            "Progress"
        );
    }

    fn finish(mut self) -> IngestReport {
        self.report.peak_in_flight = self.fetcher.peak_in_flight();
        self.report.elapsed = self.started.elapsed();
        self.report.chain_stops.sort_by_key(|(chain, _)| *chain);
        self.report
    }
}
