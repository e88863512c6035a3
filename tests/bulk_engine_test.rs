//! End-to-end bulk operation flows against in-memory collaborators.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulk_engine::config::BulkConfig;
use bulk_engine::constants::error_codes;
use bulk_engine::identity::InMemoryIdentityAuthority;
use bulk_engine::models::{BulkOperation, DetailOutcome, InputFormat, ProcessingDetail};
use bulk_engine::orchestration::{BulkOrchestrator, ExecutionPath, ProcessingMode, ProcessingOptions};
use bulk_engine::state_machine::{DetailStatus, OperationStatus};
use bulk_engine::store::{
    EntityStore, InMemoryEntityStore, InMemoryOperationStore, OperationStore, ProgressCounters,
    StoreResult,
};
use bulk_engine::EngineError;
use common::*;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_intake_creates_one_detail_per_record() {
    let harness = Harness::new();
    let handle = harness.submit(records(12), ProcessingOptions::default()).await;

    assert_eq!(handle.total_records, 12);
    assert_eq!(handle.execution_path, ExecutionPath::Chunked);

    let details = harness
        .orchestrator
        .get_details(handle.operation_id)
        .await
        .unwrap();
    assert_eq!(details.len(), 12);
    let indexes: Vec<u64> = details.iter().map(|d| d.record_index).collect();
    assert_eq!(indexes, (0..12).collect::<Vec<u64>>());

    harness
        .orchestrator
        .wait_for_completion(handle.operation_id, WAIT)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_all_valid_records_complete_with_single_worker() {
    let harness = Harness::new();
    let view = harness
        .run(
            records(3),
            ProcessingOptions {
                max_concurrency: 1,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(view.status, OperationStatus::Completed);
    assert_eq!(view.processed_records, 3);
    assert_eq!(view.successful_records, 3);
    assert_eq!(view.failed_records, 0);
    assert!(view.error_summary.is_none());
    assert!(view.started_at.is_some());
    assert!(view.completed_at.is_some());
    assert_eq!(harness.entities.count_entities().await.unwrap(), 3);
}

#[tokio::test]
async fn test_partial_failure_still_completes() {
    let harness = Harness::new();
    let view = harness
        .run(vec![record(0), invalid_record()], ProcessingOptions::default())
        .await;

    assert_eq!(view.status, OperationStatus::Completed);
    assert_eq!(view.processed_records, 2);
    assert_eq!(view.successful_records, 1);
    assert_eq!(view.failed_records, 1);
    assert_eq!(
        view.error_summary.as_deref(),
        Some("1 of 2 processed records failed")
    );

    let details = harness
        .orchestrator
        .get_details(view.operation_id)
        .await
        .unwrap();
    assert_eq!(details[0].status, DetailStatus::Success);
    assert!(details[0].entity_id.is_some());
    assert_eq!(details[1].status, DetailStatus::Failed);
    assert_eq!(
        details[1].error_code.as_deref(),
        Some(error_codes::VALIDATION_ERROR)
    );
}

#[tokio::test]
async fn test_every_record_failing_marks_operation_failed() {
    let harness = Harness::new();
    let view = harness
        .run(vec![invalid_record()], ProcessingOptions::default())
        .await;

    assert_eq!(view.status, OperationStatus::Failed);
    assert_eq!(view.processed_records, 1);
    assert_eq!(view.failed_records, 1);
}

#[tokio::test]
async fn test_chunked_path_applies_same_final_status_rule() {
    let harness = Harness::new();
    let batch = vec![invalid_record(); 9];
    let view = harness.run(batch, ProcessingOptions::default()).await;

    assert_eq!(view.status, OperationStatus::Failed);
    assert_eq!(view.processed_records, 9);
    assert_eq!(view.failed_records, 9);
}

#[tokio::test]
async fn test_inline_stops_at_first_failure_without_continue_on_error() {
    let harness = Harness::new();
    let view = harness
        .run(
            vec![record(0), invalid_record(), record(2)],
            ProcessingOptions {
                continue_on_error: false,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(view.status, OperationStatus::Completed);
    assert_eq!(view.processed_records, 2);
    assert_eq!(view.successful_records, 1);
    assert_eq!(view.failed_records, 1);

    let details = harness
        .orchestrator
        .get_details(view.operation_id)
        .await
        .unwrap();
    assert_eq!(details[2].status, DetailStatus::Pending);
}

#[tokio::test]
async fn test_chunked_processes_every_record_exactly_once() {
    let harness = Harness::new();
    let view = harness.run(records(37), ProcessingOptions::default()).await;

    assert_eq!(view.status, OperationStatus::Completed);
    assert_eq!(view.processed_records, 37);
    assert_eq!(view.successful_records, 37);
    assert_eq!(harness.store.detail_write_count(), 37);

    let operation = harness
        .store
        .get_by_id(view.operation_id)
        .await
        .unwrap()
        .unwrap();
    assert!(operation.counters_balanced());
    assert_eq!(
        operation.metadata["processing_mode"],
        json!(ExecutionPath::Chunked.to_string())
    );
}

#[tokio::test]
async fn test_sync_mode_forces_inline_for_large_batches() {
    let harness = Harness::new();
    let handle = harness
        .submit(
            records(12),
            ProcessingOptions {
                mode: ProcessingMode::Sync,
                ..Default::default()
            },
        )
        .await;
    assert_eq!(handle.execution_path, ExecutionPath::Inline);

    let view = harness
        .orchestrator
        .wait_for_completion(handle.operation_id, WAIT)
        .await
        .unwrap();
    assert_eq!(view.processed_records, 12);
}

#[tokio::test]
async fn test_duplicate_phone_within_batch() {
    let harness = Harness::new();
    let view = harness
        .run(vec![record(7), record(7)], ProcessingOptions::default())
        .await;

    assert_eq!(view.successful_records, 1);
    assert_eq!(view.failed_records, 1);
    let details = harness
        .orchestrator
        .get_details(view.operation_id)
        .await
        .unwrap();
    assert_eq!(
        details[1].error_code.as_deref(),
        Some(error_codes::DUPLICATE_RECORD)
    );
}

#[tokio::test]
async fn test_detail_batch_failure_is_not_fatal() {
    let harness = Harness::new();
    harness.store.fail_detail_batches(true);

    let view = harness.run(records(2), ProcessingOptions::default()).await;

    // Counters still advance even without tracking rows
    assert_eq!(view.status, OperationStatus::Completed);
    assert_eq!(view.processed_records, 2);
    assert!(harness
        .orchestrator
        .get_details(view.operation_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unsupported_format_and_empty_input_rejected() {
    let harness = Harness::new();
    assert!(bulk_engine::orchestration::parse_input_format("xml")
        .unwrap_err()
        .is_input_error());

    let err = harness
        .orchestrator
        .submit(ORG, ADMIN, InputFormat::Json, vec![], ProcessingOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyInput));
    assert_eq!(harness.store.operation_count(), 0);
}

#[tokio::test]
async fn test_cancel_stops_new_work() {
    // Every record spends several verification delays waiting for a grant
    // that never becomes visible.
    let harness = Harness::with_config(BulkConfig {
        chunk_size: 2,
        max_concurrency: 1,
        max_sync_records: 1,
        role_verification_attempts: 4,
        role_verification_delay_ms: 25,
        ..test_config()
    });
    harness.identity.set_grant_visibility_delay(u32::MAX);

    let handle = harness.submit(records(20), ProcessingOptions::default()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let cancelled = harness
        .orchestrator
        .cancel(handle.operation_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OperationStatus::Cancelled);

    let view = harness
        .orchestrator
        .wait_for_completion(handle.operation_id, WAIT)
        .await
        .unwrap();
    assert_eq!(view.status, OperationStatus::Cancelled);
    assert!(view.processed_records < 20);
    assert!(!harness.orchestrator.is_active(handle.operation_id));

    let pending = harness
        .orchestrator
        .get_details(handle.operation_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.status == DetailStatus::Pending)
        .count();
    assert!(pending > 0);

    // Terminal now; a second cancel is rejected
    assert!(matches!(
        harness.orchestrator.cancel(handle.operation_id).await,
        Err(EngineError::NotCancellable { .. })
    ));
}

#[tokio::test]
async fn test_skipped_role_assignment_flags_entities_for_reconciliation() {
    let harness = Harness::new();
    let view = harness
        .run(
            records(2),
            ProcessingOptions {
                skip_role_assignment: true,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(view.successful_records, 2);
    assert_eq!(harness.identity.assign_role_calls(), 0);
    assert_eq!(harness.entities.count_role_pending().await.unwrap(), 2);
}

/// Operation store whose next `get_by_id` returns a snapshot taken before a pause.
struct StaleReadStore {
    inner: InMemoryOperationStore,
    stale_next_read: AtomicBool,
    pause: Duration,
}

impl StaleReadStore {
    fn new(pause: Duration) -> Self {
        Self {
            inner: InMemoryOperationStore::new(),
            stale_next_read: AtomicBool::new(false),
            pause,
        }
    }
}

#[async_trait]
impl OperationStore for StaleReadStore {
    async fn create_operation(&self, operation: &BulkOperation) -> StoreResult<()> {
        self.inner.create_operation(operation).await
    }

    async fn create_details_batch(&self, details: &[ProcessingDetail]) -> StoreResult<()> {
        self.inner.create_details_batch(details).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[OperationStatus],
        to: OperationStatus,
    ) -> StoreResult<bool> {
        self.inner.transition_status(id, expected, to).await
    }

    async fn update_progress(&self, id: Uuid, counters: ProgressCounters) -> StoreResult<()> {
        self.inner.update_progress(id, counters).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<BulkOperation>> {
        let snapshot = self.inner.get_by_id(id).await?;
        if self.stale_next_read.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(self.pause).await;
        }
        Ok(snapshot)
    }

    async fn get_details_by_operation(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>> {
        self.inner.get_details_by_operation(id).await
    }

    async fn get_retryable_details(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>> {
        self.inner.get_retryable_details(id).await
    }

    async fn update_detail(
        &self,
        operation_id: Uuid,
        record_index: u64,
        outcome: &DetailOutcome,
        duration_ms: u64,
    ) -> StoreResult<()> {
        self.inner
            .update_detail(operation_id, record_index, outcome, duration_ms)
            .await
    }

    async fn set_error_summary(&self, id: Uuid, summary: &str) -> StoreResult<()> {
        self.inner.set_error_summary(id, summary).await
    }
}

#[tokio::test]
async fn test_cancel_racing_finalize_keeps_terminal_status() {
    let store = Arc::new(StaleReadStore::new(Duration::from_millis(300)));
    let identity = Arc::new(InMemoryIdentityAuthority::new());
    // One verification delay per record keeps the run busy for ~60ms
    identity.set_grant_visibility_delay(1);
    let orchestrator = BulkOrchestrator::new(
        store.clone(),
        Arc::new(InMemoryEntityStore::new()),
        identity,
        BulkConfig {
            role_verification_delay_ms: 60,
            ..test_config()
        },
    );

    let handle = orchestrator
        .submit(ORG, ADMIN, InputFormat::Csv, vec![record(1)], ProcessingOptions::default())
        .await
        .unwrap()
        .handle()
        .cloned()
        .unwrap();

    // cancel sees the operation as active, then the run finishes before it writes
    store.stale_next_read.store(true, Ordering::SeqCst);
    let err = orchestrator.cancel(handle.operation_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotCancellable { ref status, .. } if status == "completed"
    ));

    let view = orchestrator
        .wait_for_completion(handle.operation_id, WAIT)
        .await
        .unwrap();
    assert_eq!(view.status, OperationStatus::Completed);
    assert_eq!(view.successful_records, 1);

    let details = orchestrator.get_details(handle.operation_id).await.unwrap();
    assert_eq!(details[0].status, DetailStatus::Success);
}
