//! Read model returned by status queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::BulkOperation;
use crate::state_machine::OperationStatus;

/// Latest flushed view of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatusView {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub skipped_records: u64,
    pub progress_percentage: f64,
    /// Only while processing with at least one record done
    pub estimated_completion: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_summary: Option<String>,
    pub retry_of: Option<Uuid>,
}

impl OperationStatusView {
    pub fn from_operation(operation: &BulkOperation, now: DateTime<Utc>) -> Self {
        Self {
            operation_id: operation.id,
            status: operation.status,
            total_records: operation.total_records,
            processed_records: operation.processed_records,
            successful_records: operation.successful_records,
            failed_records: operation.failed_records,
            skipped_records: operation.skipped_records,
            progress_percentage: operation.progress_percentage(),
            estimated_completion: operation.estimated_completion(now),
            started_at: operation.started_at,
            completed_at: operation.completed_at,
            error_summary: operation.error_summary.clone(),
            retry_of: operation.parent_operation_id(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
