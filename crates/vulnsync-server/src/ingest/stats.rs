//! Counters collected during a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics collected during ingestion
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct IngestStats {
    /// Feed pages processed
    pub pages_fetched: u64,
    /// Advisories that reached a terminal outcome
    pub total_entries: u64,
    /// Records written to the dataset
    pub entries_stored: u64,
    /// Advisories without an enrichment record
    pub entries_skipped: u64,
    /// Advisories that failed enrichment or persistence
    pub entries_failed: u64,
    /// Duration in seconds
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestStats {
    /// Create new empty stats, stamped with the current time
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark stats as completed
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn inc_stored(&mut self) {
        self.entries_stored += 1;
        self.total_entries += 1;
    }

    pub fn inc_skipped(&mut self) {
        self.entries_skipped += 1;
        self.total_entries += 1;
    }

    pub fn inc_failed(&mut self) {
        self.entries_failed += 1;
        self.total_entries += 1;
    }

    /// Fold per-page counters into the run totals
    pub fn merge(self, other: Self) -> Self {
        Self {
            pages_fetched: self.pages_fetched + other.pages_fetched,
            total_entries: self.total_entries + other.total_entries,
            entries_stored: self.entries_stored + other.entries_stored,
            entries_skipped: self.entries_skipped + other.entries_skipped,
            entries_failed: self.entries_failed + other.entries_failed,
            duration_secs: self.duration_secs + other.duration_secs,
            started_at: self.started_at.or(other.started_at),
            completed_at: other.completed_at.or(self.completed_at),
        }
    }
}
