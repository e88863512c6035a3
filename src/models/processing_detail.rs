//! ProcessingDetail
//!
//! Per-record outcome row within a bulk operation. Exactly one row exists per
//! input index; the worker that owns the index writes it once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::state_machine::DetailStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingDetail {
    pub id: Uuid,
    pub bulk_operation_id: Uuid,
    /// Zero-based position in the submitted batch
    pub record_index: u64,
    pub status: DetailStatus,
    /// Copy of the submitted payload, carried forward on retry
    pub input_data: Value,
    pub entity_id: Option<String>,
    pub identity_id: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub processing_duration_ms: Option<u64>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ProcessingDetail {
    /// Fresh `Pending` row for `record_index`
    pub fn pending(bulk_operation_id: Uuid, record_index: u64, input_data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            bulk_operation_id,
            record_index,
            status: DetailStatus::Pending,
            input_data,
            entity_id: None,
            identity_id: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            processing_duration_ms: None,
            metadata: Map::new(),
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Build one pending row per record, indexed by position.
    pub fn for_records(bulk_operation_id: Uuid, records: &[Value]) -> Vec<Self> {
        records
            .iter()
            .enumerate()
            .map(|(index, record)| Self::pending(bulk_operation_id, index as u64, record.clone()))
            .collect()
    }

    /// Apply the single terminal update produced by a pipeline run.
    pub fn apply_outcome(&mut self, outcome: &DetailOutcome, duration_ms: u64) {
        match outcome {
            DetailOutcome::Success {
                entity_id,
                identity_id,
            } => {
                self.status = DetailStatus::Success;
                self.entity_id = entity_id.clone();
                self.identity_id = identity_id.clone();
                self.error_message = None;
                self.error_code = None;
            }
            DetailOutcome::Failed { message, code } => {
                self.status = DetailStatus::Failed;
                self.error_message = Some(message.clone());
                self.error_code = Some(code.clone());
            }
        }
        self.processing_duration_ms = Some(duration_ms);
        self.processed_at = Some(Utc::now());
    }
}

/// Terminal result of processing one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetailOutcome {
    Success {
        entity_id: Option<String>,
        identity_id: Option<String>,
    },
    Failed {
        message: String,
        code: String,
    },
}

impl DetailOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status(&self) -> DetailStatus {
        match self {
            Self::Success { .. } => DetailStatus::Success,
            Self::Failed { .. } => DetailStatus::Failed,
        }
    }
}
