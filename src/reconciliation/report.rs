//! Reconciliation pass summaries. Not persisted; returned and logged only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one reconciliation pass across all sweeps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,

    pub orphans_checked: u64,
    pub orphans_deleted: u64,
    /// Lookups without a definitive answer; retried next pass
    pub orphans_skipped: u64,
    /// Local rows removed with the orphans (dependents and parents)
    pub rows_deleted: u64,

    pub roles_processed: u64,
    pub roles_fixed: u64,
    pub roles_still_pending: u64,

    pub secondary_links_processed: u64,
    pub secondary_links_fixed: u64,
    pub secondary_links_still_pending: u64,

    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl ReconciliationReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            duration_ms: 0,
            orphans_checked: 0,
            orphans_deleted: 0,
            orphans_skipped: 0,
            rows_deleted: 0,
            roles_processed: 0,
            roles_fixed: 0,
            roles_still_pending: 0,
            secondary_links_processed: 0,
            secondary_links_fixed: 0,
            secondary_links_still_pending: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
    }

    /// Record that `sweep` was interrupted by cancellation.
    pub fn record_cancelled(&mut self, sweep: &str) {
        self.cancelled = true;
        self.errors.push(format!("{sweep}: cancelled"));
    }

    pub fn record_error(&mut self, sweep: &str, subject: &str, error: impl std::fmt::Display) {
        self.errors.push(format!("{sweep}: {subject}: {error}"));
    }

    /// Anything worth logging happened in this pass.
    pub fn has_work(&self) -> bool {
        self.orphans_deleted > 0
            || self.roles_processed > 0
            || self.secondary_links_processed > 0
            || !self.errors.is_empty()
    }
}

/// Current backlog of drift waiting for reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounts {
    pub role_assignments: u64,
    pub secondary_links: u64,
    pub tracked_entities: u64,
}
