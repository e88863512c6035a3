//! BulkOperation
//!
//! One bulk submission and its lifecycle record. Created `Pending` at intake
//! with `total_records` fixed; counters are advanced by the progress
//! aggregator and status by the orchestrator. Never deleted.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::constants::metadata_keys;
use crate::state_machine::OperationStatus;

/// Input format tag of the submission. Parsing happens upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Csv,
    Excel,
    Json,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Excel => write!(f, "excel"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "excel" | "xlsx" | "xls" => Ok(Self::Excel),
            "json" => Ok(Self::Json),
            other => Err(other.to_string()),
        }
    }
}

/// Persisted bulk operation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: Uuid,
    pub organization_id: String,
    pub initiated_by: String,
    pub input_format: InputFormat,
    pub status: OperationStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub skipped_records: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
    pub result_file_url: Option<String>,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to create a new operation row
#[derive(Debug, Clone)]
pub struct NewBulkOperation {
    pub organization_id: String,
    pub initiated_by: String,
    pub input_format: InputFormat,
    pub total_records: u64,
    pub metadata: Map<String, Value>,
}

impl NewBulkOperation {
    pub fn new(
        organization_id: impl Into<String>,
        initiated_by: impl Into<String>,
        input_format: InputFormat,
        total_records: u64,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            initiated_by: initiated_by.into(),
            input_format,
            total_records,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Materialize the row in `Pending` with zeroed counters.
    pub fn into_operation(self) -> BulkOperation {
        let now = Utc::now();
        BulkOperation {
            id: Uuid::new_v4(),
            organization_id: self.organization_id,
            initiated_by: self.initiated_by,
            input_format: self.input_format,
            status: OperationStatus::Pending,
            total_records: self.total_records,
            processed_records: 0,
            successful_records: 0,
            failed_records: 0,
            skipped_records: 0,
            started_at: None,
            completed_at: None,
            metadata: self.metadata,
            result_file_url: None,
            error_summary: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl BulkOperation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Percentage of records processed, 0.0 - 100.0
    pub fn progress_percentage(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        (self.processed_records as f64 / self.total_records as f64) * 100.0
    }

    /// Estimate completion time from the observed processing rate.
    ///
    /// Only available while `Processing` with at least one record processed.
    pub fn estimated_completion(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.status != OperationStatus::Processing || self.processed_records == 0 {
            return None;
        }
        let started_at = self.started_at?;
        let elapsed_ms = (now - started_at).num_milliseconds().max(0) as f64;
        let per_record_ms = elapsed_ms / self.processed_records as f64;
        let remaining = self.total_records.saturating_sub(self.processed_records) as f64;

        Some(now + ChronoDuration::milliseconds((per_record_ms * remaining).round() as i64))
    }

    /// Operation this one retries, if it was created by the retry subsystem.
    pub fn parent_operation_id(&self) -> Option<Uuid> {
        self.metadata
            .get(metadata_keys::RETRY_OF)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// `processed == successful + failed + skipped`
    pub fn counters_balanced(&self) -> bool {
        self.processed_records
            == self.successful_records + self.failed_records + self.skipped_records
    }
}
