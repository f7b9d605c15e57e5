//! Replay batching
//!
//! Fetched records are buffered and written to a [`ReplaySink`] once the
//! buffer reaches `max_records` or `max_age` has passed since the previous
//! flush, whichever comes first. A failed flush leaves the buffer untouched
//! so the caller can retry it.

mod buffered_batch;

use std::time::{Duration, Instant};

use buffered_batch::BufferedBatch;
use showdown_ingest_core::ReplayRecord;
use showdown_ingest_storage::{ReplaySink, StorageError};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_records: usize,
    pub max_age: Duration,
}

impl BatchConfig {
    pub fn new(max_records: usize, max_age: Duration) -> Self {
        Self {
            max_records: max_records.max(1),
            max_age,
        }
    }
}

/// Outcome of a successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records handed to storage
    pub written: usize,
    /// Rows that were actually new
    pub inserted: usize,
}

impl FlushReport {
    /// Records storage skipped because the id already existed.
    pub fn ignored(&self) -> usize {
        self.written.saturating_sub(self.inserted)
    }
}

/// Accumulates fetched replays and persists them in batches.
#[derive(Debug)]
pub struct PersistenceBatcher {
    config: BatchConfig,
    batch: BufferedBatch,
    last_flush: Instant,
}

impl PersistenceBatcher {
    pub fn new(config: BatchConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Batcher whose age clock starts at `now`.
    pub fn starting_at(config: BatchConfig, now: Instant) -> Self {
        Self {
            batch: BufferedBatch::with_capacity(config.max_records),
            config,
            last_flush: now,
        }
    }

    /// Buffer a record. Returns true when the buffer has reached its size
    /// threshold and should be flushed.
    pub fn enqueue(&mut self, record: ReplayRecord) -> bool {
        self.batch.add(record);
        self.batch.len() >= self.config.max_records
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.batch.total_bytes()
    }

    /// Size threshold reached, or `max_age` elapsed since the last flush.
    pub fn should_flush_at(&self, now: Instant) -> bool {
        self.batch.len() >= self.config.max_records
            || now.saturating_duration_since(self.last_flush) >= self.config.max_age
    }

    /// Time left before the age trigger fires, zero if it already has.
    pub fn time_until_due(&self, now: Instant) -> Duration {
        (self.last_flush + self.config.max_age).saturating_duration_since(now)
    }

    /// Write the whole buffer to `sink` as one batch.
    ///
    /// The buffer is cleared and the age clock restarted only when the
    /// write succeeds. Flushing an empty buffer just restarts the clock.
    pub async fn flush<S>(&mut self, sink: &S) -> Result<FlushReport, StorageError>
    where
        S: ReplaySink + ?Sized,
    {
        if self.batch.is_empty() {
            self.last_flush = Instant::now();
            return Ok(FlushReport::default());
        }

        let written = self.batch.len();
        let span = self.batch.span();
        let inserted = sink.write_batch(self.batch.records()).await?;

        debug!(
            written,
            inserted,
            bytes = self.batch.total_bytes(),
            uploadtime_span = ?span,
            "Flushed replay batch"
        );

        self.batch.clear();
        self.last_flush = Instant::now();
        Ok(FlushReport { written, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<BTreeSet<String>>,
        failing: Mutex<bool>,
        writes: Mutex<usize>,
    }

    #[async_trait]
    impl ReplaySink for MemorySink {
        async fn write_batch(&self, records: &[ReplayRecord]) -> Result<usize, StorageError> {
            *self.writes.lock() += 1;
            if *self.failing.lock() {
                return Err(StorageError::write_failure(
                    records.len(),
                    "database is locked".to_string(),
                ));
            }
            let mut rows = self.rows.lock();
            Ok(records
                .iter()
                .filter(|record| rows.insert(record.id.clone()))
                .count())
        }
    }

    fn record(id: &str) -> ReplayRecord {
        ReplayRecord {
            id: id.to_string(),
            format: "gen9vgc2024regh".to_string(),
            players: vec!["p1".to_string(), "p2".to_string()],
            log: "|win|p1".to_string(),
            uploadtime: 1_730_456_000,
            rating: None,
        }
    }

    fn config(max_records: usize, max_age_secs: u64) -> BatchConfig {
        BatchConfig::new(max_records, Duration::from_secs(max_age_secs))
    }

    #[test]
    fn size_threshold_triggers_flush() {
        let start = Instant::now();
        let mut batcher = PersistenceBatcher::starting_at(config(3, 60), start);

        assert!(!batcher.enqueue(record("a")));
        assert!(!batcher.enqueue(record("b")));
        assert!(!batcher.should_flush_at(start));
        assert!(batcher.enqueue(record("c")));
        assert!(batcher.should_flush_at(start));
    }

    #[test]
    fn age_threshold_triggers_flush() {
        let start = Instant::now();
        let mut batcher = PersistenceBatcher::starting_at(config(100, 10), start);
        batcher.enqueue(record("a"));

        assert!(!batcher.should_flush_at(start + Duration::from_secs(9)));
        assert!(batcher.should_flush_at(start + Duration::from_secs(10)));
        assert_eq!(
            batcher.time_until_due(start + Duration::from_secs(4)),
            Duration::from_secs(6)
        );
        assert_eq!(
            batcher.time_until_due(start + Duration::from_secs(30)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn flush_clears_buffer_and_reports_ignored_rows() {
        let sink = MemorySink::default();
        sink.rows.lock().insert("a".to_string());

        let mut batcher = PersistenceBatcher::new(config(10, 60));
        batcher.enqueue(record("a"));
        batcher.enqueue(record("b"));

        let report = batcher.flush(&sink).await.unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.ignored(), 1);
        assert!(batcher.is_empty());
        assert_eq!(batcher.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn failed_flush_keeps_buffer() {
        let sink = MemorySink::default();
        *sink.failing.lock() = true;

        let mut batcher = PersistenceBatcher::new(config(10, 60));
        batcher.enqueue(record("a"));
        batcher.enqueue(record("b"));

        let err = batcher.flush(&sink).await.unwrap_err();
        assert_eq!(err.code(), Some("S004"));
        assert_eq!(batcher.len(), 2);

        *sink.failing.lock() = false;
        let report = batcher.flush(&sink).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(sink.rows.lock().len(), 2);
    }

    #[tokio::test]
    async fn empty_flush_skips_storage_and_restarts_clock() {
        let sink = MemorySink::default();
        let start = Instant::now();
        let mut batcher = PersistenceBatcher::starting_at(config(10, 5), start);

        let report = batcher.flush(&sink).await.unwrap();
        assert_eq!(report, FlushReport::default());
        assert_eq!(*sink.writes.lock(), 0);
        assert!(!batcher.should_flush_at(start + Duration::from_secs(1)));
    }
}
