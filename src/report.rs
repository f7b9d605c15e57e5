// Run summary returned by the orchestrator.

use showdown_ingest_client::SourceError;
use showdown_ingest_core::{ChainStop, ReplayId};
use std::fmt;
use std::time::Duration;

/// A replay that could not be fetched within the retry budget.
#[derive(Debug, Clone)]
pub struct FailedFetch {
    pub id: ReplayId,
    pub attempts: u32,
    pub error: SourceError,
}

/// Aggregate counts for one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Search pages received
    pub pages_searched: usize,
    /// Searches abandoned after exhausting retries
    pub failed_searches: usize,
    pub summaries_seen: usize,
    /// Already in storage at startup
    pub skipped_known: usize,
    /// Private or password protected
    pub skipped_ineligible: usize,
    /// Already queued or being fetched
    pub skipped_in_flight: usize,
    pub fetched: usize,
    pub failed: Vec<FailedFetch>,
    /// Fetches that succeeded or failed only after at least one retry
    pub retried_fetches: usize,
    pub fetch_retries: u64,
    pub rows_inserted: usize,
    /// Written but already present, ignored by storage
    pub rows_ignored: usize,
    pub flushes: usize,
    pub flush_failures: usize,
    pub peak_in_flight: usize,
    /// Why each search chain stopped, by chain index
    pub chain_stops: Vec<(usize, ChainStop)>,
    /// Stopped by a shutdown signal before the window was exhausted
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn failed_fetches(&self) -> usize {
        self.failed.len()
    }

    /// Persisted replays per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_inserted as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Ingested {} new replays in {:.1}s ({:.1}/s)",
            self.rows_inserted,
            self.elapsed.as_secs_f64(),
            self.throughput()
        )?;
        if self.interrupted {
            writeln!(f, "  interrupted before the window was exhausted; rerun to resume")?;
        }
        writeln!(
            f,
            "  search:  {} pages, {} failed, {} summaries",
            self.pages_searched, self.failed_searches, self.summaries_seen
        )?;
        writeln!(
            f,
            "  skipped: {} known, {} private, {} duplicate",
            self.skipped_known, self.skipped_ineligible, self.skipped_in_flight
        )?;
        writeln!(
            f,
            "  fetch:   {} ok, {} failed, {} retried ({} retries), peak {} in flight",
            self.fetched,
            self.failed.len(),
            self.retried_fetches,
            self.fetch_retries,
            self.peak_in_flight
        )?;
        write!(
            f,
            "  storage: {} flushes, {} failed, {} duplicates ignored",
            self.flushes, self.flush_failures, self.rows_ignored
        )?;
        for failed in self.failed.iter().take(10) {
            write!(
                f,
                "\n  failed {} after {} attempts: {}",
                failed.id, failed.attempts, failed.error
            )?;
        }
        if self.failed.len() > 10 {
            write!(f, "\n  ... and {} more", self.failed.len() - 10)?;
        }
        Ok(())
    }
}
