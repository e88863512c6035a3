//! # Retry Subsystem
//!
//! Retries are data: a retry is a new bulk operation scoped to the
//! retryable failures of a terminal operation, carrying `retry_of`
//! provenance in its metadata. The new operation runs through the same
//! execution paths as any other. Nothing is retried automatically; a record
//! that fails again needs another explicit retry.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::options::ProcessingOptions;
use super::orchestrator::{BulkOrchestrator, OperationHandle};
use crate::constants::metadata_keys;
use crate::error::{EngineError, Result};
use crate::models::{BulkOperation, NewBulkOperation, ProcessingDetail};

/// Returned by a successful retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryHandle {
    pub original_operation_id: Uuid,
    pub retried_records: usize,
    pub operation: OperationHandle,
}

impl RetryHandle {
    pub fn operation_id(&self) -> Uuid {
        self.operation.operation_id
    }
}

/// Fresh pending detail rows for the retry operation, indexed sequentially.
pub fn retry_details(new_operation_id: Uuid, failed: &[ProcessingDetail]) -> Vec<ProcessingDetail> {
    failed
        .iter()
        .enumerate()
        .map(|(index, original)| {
            let mut detail =
                ProcessingDetail::pending(new_operation_id, index as u64, original.input_data.clone());
            detail.retry_count = original.retry_count + 1;
            detail
                .metadata
                .insert(metadata_keys::ORIGINAL_INDEX.to_string(), json!(original.record_index));
            detail.metadata.insert(
                metadata_keys::ORIGINAL_DETAIL_ID.to_string(),
                json!(original.id.to_string()),
            );
            detail
        })
        .collect()
}

pub struct RetryService {
    orchestrator: BulkOrchestrator,
}

impl RetryService {
    pub fn new(orchestrator: BulkOrchestrator) -> Self {
        Self { orchestrator }
    }

    #[instrument(skip(self))]
    pub async fn retry_failed(&self, operation_id: Uuid) -> Result<RetryHandle> {
        let store = self.orchestrator.store();
        let original = store
            .get_by_id(operation_id)
            .await?
            .ok_or(EngineError::OperationNotFound(operation_id))?;

        if !original.is_terminal() {
            return Err(EngineError::NotRetryable {
                operation_id,
                reason: format!("operation is still {}", original.status),
            });
        }

        let selected = store.get_retryable_details(operation_id).await?;
        if selected.is_empty() {
            info!(operation_id = %operation_id, "RETRY: No retryable records");
            return Err(EngineError::NoRetryableRecords(operation_id));
        }

        let options = self.original_options(&original);
        let path = options.execution_path(selected.len());
        let retry = NewBulkOperation::new(
            original.organization_id.as_str(),
            original.initiated_by.as_str(),
            original.input_format,
            selected.len() as u64,
        )
        .with_metadata(metadata_keys::RETRY_OF, json!(operation_id.to_string()))
        .with_metadata(metadata_keys::RETRY_RECORD_COUNT, json!(selected.len()))
        .with_metadata(metadata_keys::PROCESSING_MODE, json!(path.to_string()))
        .with_metadata(
            metadata_keys::PROCESSING_OPTIONS,
            serde_json::to_value(&options).unwrap_or_default(),
        )
        .into_operation();

        store.create_operation(&retry).await?;

        let details = retry_details(retry.id, &selected);
        if let Err(e) = store.create_details_batch(&details).await {
            error!(
                operation_id = %retry.id,
                error = %e,
                "RETRY: Failed to create processing details, continuing without tracking rows"
            );
        }

        let records: Vec<Value> = selected.iter().map(|d| d.input_data.clone()).collect();
        let handle = self.orchestrator.launch(&retry, records, options);

        info!(
            original_operation_id = %operation_id,
            retry_operation_id = %retry.id,
            records = selected.len(),
            "RETRY: 🔁 Retry operation launched"
        );

        Ok(RetryHandle {
            original_operation_id: operation_id,
            retried_records: selected.len(),
            operation: handle,
        })
    }

    /// Options of the original submission, re-defaulted; validate-only never carries over.
    fn original_options(&self, original: &BulkOperation) -> ProcessingOptions {
        let options: ProcessingOptions = original
            .metadata
            .get(metadata_keys::PROCESSING_OPTIONS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        ProcessingOptions {
            validate_only: false,
            ..options
        }
        .with_defaults(self.orchestrator.config())
    }
}
