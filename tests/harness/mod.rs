//! Test harness for pipeline integration tests
//!
//! Provides a simulated replay service implementing `ReplaySource`:
//! - search pages served newest-first from a fixed catalogue, `page_size`
//!   entries per page, honouring the exclusive `before` cursor
//! - scripted fetch failures (fail once, fail always)
//! - concurrency tracking so tests can check the in-flight bound
//!
//! plus helpers for building configs and in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use showdown_ingest::IngestConfig;
use showdown_ingest_client::{ReplaySource, SourceError};
use showdown_ingest_core::{ReplayRecord, ReplaySummary, SearchWindow};
use showdown_ingest_storage::{ReplaySink, ReplayStore, StorageError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const FORMAT: &str = "gen9vgc2024regh";
/// 2024-11-01 10:00:00 UTC
pub const WINDOW_START: i64 = 1_730_455_200;
/// 2024-11-01 11:00:00 UTC
pub const WINDOW_END: i64 = 1_730_458_800;

/// Default test config: the 10:00-11:00 window, fast retries, no real
/// rate limiting.
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig::default();
    config.window.start = "2024-11-01_10:00:00".to_string();
    config.window.end = "2024-11-01_11:00:00".to_string();
    config.search.format = Some(FORMAT.to_string());
    config.fetch.pool_size = 8;
    config.fetch.rate_limit = 10_000;
    config.fetch.initial_backoff_ms = 1;
    config.fetch.timeout_ms = 1_000;
    config.batch.max_records = 51;
    config.batch.max_age_secs = 60;
    config.log.progress_interval_secs = 60;
    config
}

pub fn replay_id(n: i64) -> String {
    format!("{FORMAT}-{}", 2_200_000_000 + n)
}

pub fn summary(n: i64, uploadtime: i64) -> ReplaySummary {
    ReplaySummary {
        id: replay_id(n),
        uploadtime,
        rating: Some(1200 + n),
        format: "[Gen 9] VGC 2024 Reg H".to_string(),
        private: false,
        password: false,
    }
}

/// `count` summaries spaced `step` seconds apart going back from `end`.
pub fn catalogue(count: i64, end: i64, step: i64) -> Vec<ReplaySummary> {
    (1..=count).map(|k| summary(k, end - step * k)).collect()
}

/// In-process stand-in for the replay service.
pub struct SimulatedService {
    /// Sorted newest first
    catalogue: Vec<ReplaySummary>,
    page_size: usize,
    fetch_delay: Duration,
    fail_once: Mutex<HashSet<String>>,
    fail_always: HashSet<String>,
    panic_on: HashSet<String>,
    fetch_calls: Mutex<HashMap<String, u32>>,
    searched: Mutex<Vec<SearchWindow>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SimulatedService {
    pub fn new(mut catalogue: Vec<ReplaySummary>, page_size: usize) -> Self {
        catalogue.sort_by(|a, b| b.uploadtime.cmp(&a.uploadtime));
        Self {
            catalogue,
            page_size,
            fetch_delay: Duration::from_millis(1),
            fail_once: Mutex::new(HashSet::new()),
            fail_always: HashSet::new(),
            panic_on: HashSet::new(),
            fetch_calls: Mutex::new(HashMap::new()),
            searched: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// First fetch of `id` fails, later ones succeed.
    pub fn failing_once(self, id: &str) -> Self {
        self.fail_once.lock().insert(id.to_string());
        self
    }

    /// Every fetch of `id` fails.
    pub fn failing_always(mut self, id: &str) -> Self {
        self.fail_always.insert(id.to_string());
        self
    }

    /// Fetching `id` panics inside the service.
    pub fn panicking_on(mut self, id: &str) -> Self {
        self.panic_on.insert(id.to_string());
        self
    }

    pub fn fetch_calls(&self, id: &str) -> u32 {
        self.fetch_calls.lock().get(id).copied().unwrap_or(0)
    }

    pub fn total_fetch_calls(&self) -> u32 {
        self.fetch_calls.lock().values().sum()
    }

    pub fn searched_windows(&self) -> Vec<SearchWindow> {
        self.searched.lock().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record_for(&self, id: &str) -> Option<ReplayRecord> {
        self.catalogue
            .iter()
            .find(|summary| summary.id == id)
            .map(|summary| ReplayRecord {
                id: summary.id.clone(),
                format: FORMAT.to_string(),
                players: vec![format!("p1-{}", summary.id), "p2".to_string()],
                log: format!("|j|p1\n|j|p2\n|t:|{}\n|win|p1", summary.uploadtime),
                uploadtime: summary.uploadtime,
                rating: summary.rating,
            })
    }
}

#[async_trait]
impl ReplaySource for SimulatedService {
    async fn search(&self, window: &SearchWindow) -> Result<Vec<ReplaySummary>, SourceError> {
        self.searched.lock().push(window.clone());
        Ok(self
            .catalogue
            .iter()
            .filter(|summary| summary.uploadtime < window.before)
            .take(self.page_size)
            .cloned()
            .collect())
    }

    async fn fetch(&self, id: &str) -> Result<ReplayRecord, SourceError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.fetch_delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        *self.fetch_calls.lock().entry(id.to_string()).or_insert(0) += 1;

        if self.panic_on.contains(id) {
            panic!("replay body for {id} could not be parsed");
        }
        if self.fail_always.contains(id) {
            return Err(SourceError::Status { status: 503 });
        }
        if self.fail_once.lock().remove(id) {
            return Err(SourceError::Transport("connection reset by peer".to_string()));
        }

        self.record_for(id)
            .ok_or(SourceError::Status { status: 404 })
    }
}

/// Store wrapper whose first `failures` writes fail.
pub struct FlakySink {
    store: ReplayStore,
    failures_left: Mutex<u32>,
    attempts: AtomicUsize,
}

impl FlakySink {
    pub fn new(store: ReplayStore, failures: u32) -> Self {
        Self {
            store,
            failures_left: Mutex::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplaySink for FlakySink {
    async fn write_batch(&self, records: &[ReplayRecord]) -> Result<usize, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(StorageError::write_failure(
                    records.len(),
                    "database is locked".to_string(),
                ));
            }
        }
        self.store.write_batch(records).await
    }
}
