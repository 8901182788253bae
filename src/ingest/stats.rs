//! Run statistics.
//!
//! Stages bump shared atomic [`Counters`] while the run is in flight; the pipeline folds
//! them into a [`LoadSummary`] once every stage has been joined.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bound on rejected records kept for the summary; the count keeps going.
pub const MAX_REPORTED_REJECTS: usize = 100;

/// A record the parser pool skipped, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub source: String,
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub lines_read: AtomicU64,
    pub blank_lines: AtomicU64,
    pub records_parsed: AtomicU64,
    pub records_skipped: AtomicU64,
    rejects: Mutex<Vec<RejectedRecord>>,
}

impl Counters {
    pub fn record_reject(&self, reject: RejectedRecord) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
        let mut rejects = self.rejects.lock();
        if rejects.len() < MAX_REPORTED_REJECTS {
            rejects.push(reject);
        }
    }

    pub fn take_rejects(&self) -> Vec<RejectedRecord> {
        std::mem::take(&mut *self.rejects.lock())
    }
}

/// Outcome of one bulk-loader invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchResult {
    /// Statement executed; `inserted` excludes rows dropped on id conflict.
    Loaded { rows: usize, inserted: u64 },
    /// Gave up after retries; the batch was skipped.
    Failed { rows: usize },
}

/// What a pipeline run did.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub objects: usize,
    pub lines_read: u64,
    pub blank_lines: u64,
    pub records_parsed: u64,
    pub records_skipped: u64,
    pub batches_dispatched: u64,
    pub batches_failed: u64,
    /// New rows written; duplicates of existing ids are not counted.
    pub rows_inserted: u64,
    pub rows_failed: u64,
    pub rejected: Vec<RejectedRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl LoadSummary {
    pub fn new(objects: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            objects,
            lines_read: 0,
            blank_lines: 0,
            records_parsed: 0,
            records_skipped: 0,
            batches_dispatched: 0,
            batches_failed: 0,
            rows_inserted: 0,
            rows_failed: 0,
            rejected: Vec::new(),
            started_at,
            finished_at: started_at,
            elapsed: Duration::ZERO,
        }
    }

    /// Fold the stage counters in.
    pub fn absorb_counters(&mut self, counters: &Counters) {
        self.lines_read += counters.lines_read.load(Ordering::Relaxed);
        self.blank_lines += counters.blank_lines.load(Ordering::Relaxed);
        self.records_parsed += counters.records_parsed.load(Ordering::Relaxed);
        self.records_skipped += counters.records_skipped.load(Ordering::Relaxed);
        self.rejected.extend(counters.take_rejects());
    }

    pub fn record_batch(&mut self, result: BatchResult) {
        self.batches_dispatched += 1;
        match result {
            BatchResult::Loaded { inserted, .. } => self.rows_inserted += inserted,
            BatchResult::Failed { rows } => {
                self.batches_failed += 1;
                self.rows_failed += rows as u64;
            }
        }
    }

    /// Rows the store received that it already had (or saw twice in this run).
    pub fn rows_deduplicated(&self) -> u64 {
        self.records_parsed
            .saturating_sub(self.rows_inserted)
            .saturating_sub(self.rows_failed)
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} objects, {} lines ({} blank), {} parsed, {} skipped, {} batches ({} failed), \
             {} rows inserted, {} deduplicated, {} failed in {:.2}s",
            self.objects,
            self.lines_read,
            self.blank_lines,
            self.records_parsed,
            self.records_skipped,
            self.batches_dispatched,
            self.batches_failed,
            self.rows_inserted,
            self.rows_deduplicated(),
            self.rows_failed,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_list_is_capped_but_count_is_not() {
        let counters = Counters::default();
        for line in 0..(MAX_REPORTED_REJECTS as u64 + 5) {
            counters.record_reject(RejectedRecord {
                source: "a.jsonl".into(),
                line,
                reason: "bad".into(),
            });
        }

        assert_eq!(
            counters.records_skipped.load(Ordering::Relaxed),
            MAX_REPORTED_REJECTS as u64 + 5
        );
        assert_eq!(counters.take_rejects().len(), MAX_REPORTED_REJECTS);
    }

    #[test]
    fn batch_results_accumulate() {
        let mut summary = LoadSummary::new(1, Utc::now());
        summary.records_parsed = 10;
        summary.record_batch(BatchResult::Loaded { rows: 4, inserted: 3 });
        summary.record_batch(BatchResult::Failed { rows: 4 });
        summary.record_batch(BatchResult::Loaded { rows: 2, inserted: 2 });

        assert_eq!(summary.batches_dispatched, 3);
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.rows_inserted, 5);
        assert_eq!(summary.rows_failed, 4);
        assert_eq!(summary.rows_deduplicated(), 1);
    }

    #[test]
    fn display_mentions_key_numbers() {
        let mut summary = LoadSummary::new(4, Utc::now());
        summary.rows_inserted = 4003;
        let text = summary.to_string();
        assert!(text.starts_with("4 objects"));
        assert!(text.contains("4003 rows inserted"));
    }
}
