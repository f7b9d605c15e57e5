// Buffered batch accumulation
//
// Holds fetched records until the batcher hands them to storage.

use showdown_ingest_core::ReplayRecord;

/// Records waiting to be persisted
#[derive(Debug, Default)]
pub(crate) struct BufferedBatch {
    records: Vec<ReplayRecord>,
    total_bytes: usize, // Approximate, log text dominates
    oldest_uploadtime: i64,
    newest_uploadtime: i64,
}

impl BufferedBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn add(&mut self, record: ReplayRecord) {
        if self.records.is_empty() {
            self.oldest_uploadtime = record.uploadtime;
            self.newest_uploadtime = record.uploadtime;
        } else {
            self.oldest_uploadtime = self.oldest_uploadtime.min(record.uploadtime);
            self.newest_uploadtime = self.newest_uploadtime.max(record.uploadtime);
        }
        self.total_bytes += record.log.len() + record.id.len() + record.format.len();
        self.records.push(record);
    }

    pub fn records(&self) -> &[ReplayRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Upload-time span covered by the buffered records, if any.
    pub fn span(&self) -> Option<(i64, i64)> {
        (!self.records.is_empty()).then_some((self.oldest_uploadtime, self.newest_uploadtime))
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.total_bytes = 0;
        self.oldest_uploadtime = 0;
        self.newest_uploadtime = 0;
    }
}
