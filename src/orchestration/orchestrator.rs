//! # Bulk Orchestrator
//!
//! Intake for bulk submissions. `submit` rejects empty input, optionally
//! runs validation only, persists the operation and its detail rows, picks
//! the execution path and hands the run to a detached task. The caller gets
//! an [`OperationHandle`] right away and polls `get_status`.
//!
//! Every launched operation is tracked in an in-process registry holding its
//! cancellation token and a completion signal, so `cancel` can stop new work
//! and tests can await completion without polling.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::executor::{OperationExecutor, OperationRun};
use super::options::{ExecutionPath, ProcessingOptions};
use super::retry::{RetryHandle, RetryService};
use super::status::OperationStatusView;
use crate::config::BulkConfig;
use crate::constants::metadata_keys;
use crate::error::{EngineError, Result};
use crate::identity::IdentityAuthority;
use crate::logging::log_operation;
use crate::models::{BulkOperation, InputFormat, NewBulkOperation, ProcessingDetail};
use crate::pipeline::{validate_record, PipelineBuilder, PipelineDependencies, RecordFieldError};
use crate::state_machine::{OperationEvent, OperationStateMachine, OperationStatus};
use crate::store::{EntityStore, OperationStore};

/// Returned by a successful submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub execution_path: ExecutionPath,
    pub total_records: u64,
    pub status_url: String,
    pub result_url: String,
}

/// Outcome of a validate-only submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub errors: Vec<RecordFieldError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(OperationHandle),
    Validation(ValidationSummary),
}

impl SubmitOutcome {
    pub fn handle(&self) -> Option<&OperationHandle> {
        match self {
            Self::Accepted(handle) => Some(handle),
            Self::Validation(_) => None,
        }
    }
}

/// Parse a caller-supplied format tag.
pub fn parse_input_format(raw: &str) -> Result<InputFormat> {
    raw.parse::<InputFormat>()
        .map_err(EngineError::UnsupportedFormat)
}

struct ActiveOperation {
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

#[derive(Clone)]
pub struct BulkOrchestrator {
    store: Arc<dyn OperationStore>,
    executor: OperationExecutor,
    deps: PipelineDependencies,
    config: BulkConfig,
    active: Arc<DashMap<Uuid, ActiveOperation>>,
}

impl std::fmt::Debug for BulkOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkOrchestrator")
            .field("config", &self.config)
            .field("active_operations", &self.active.len())
            .finish()
    }
}

impl BulkOrchestrator {
    pub fn new(
        store: Arc<dyn OperationStore>,
        entities: Arc<dyn EntityStore>,
        identity: Arc<dyn IdentityAuthority>,
        config: BulkConfig,
    ) -> Self {
        let deps = PipelineDependencies::new(entities, identity)
            .with_role(config.role.clone())
            .with_verification(
                config.role_verification_attempts,
                config.role_verification_delay(),
            );
        Self {
            executor: OperationExecutor::new(store.clone(), config.clone()),
            store,
            deps,
            config,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn OperationStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Accept a bulk submission.
    #[instrument(skip(self, records, options), fields(records = records.len()))]
    pub async fn submit(
        &self,
        organization_id: &str,
        initiated_by: &str,
        input_format: InputFormat,
        records: Vec<Value>,
        options: ProcessingOptions,
    ) -> Result<SubmitOutcome> {
        if records.is_empty() {
            warn!(organization_id, "BULK: Rejecting empty submission");
            return Err(EngineError::EmptyInput);
        }

        let options = options.with_defaults(&self.config);
        if options.validate_only {
            let summary = self.validate(&records);
            info!(
                organization_id,
                total = summary.total,
                valid = summary.valid,
                invalid = summary.invalid,
                "BULK: Validate-only submission"
            );
            return Ok(SubmitOutcome::Validation(summary));
        }

        let total = records.len();
        let path = options.execution_path(total);
        let operation = NewBulkOperation::new(organization_id, initiated_by, input_format, total as u64)
            .with_metadata(metadata_keys::PROCESSING_MODE, json!(path.to_string()))
            .with_metadata(
                metadata_keys::PROCESSING_OPTIONS,
                serde_json::to_value(&options).unwrap_or_default(),
            )
            .into_operation();

        self.store.create_operation(&operation).await?;

        let details = ProcessingDetail::for_records(operation.id, &records);
        if let Err(e) = self.store.create_details_batch(&details).await {
            error!(
                operation_id = %operation.id,
                error = %e,
                "BULK: Failed to create processing details, continuing without tracking rows"
            );
        }

        let handle = self.launch(&operation, records, options);

        if path == ExecutionPath::Inline && total <= self.config.small_batch_threshold {
            tokio::time::sleep(self.config.small_batch_grace()).await;
        }

        Ok(SubmitOutcome::Accepted(handle))
    }

    /// Validate every record without persisting anything.
    pub fn validate(&self, records: &[Value]) -> ValidationSummary {
        let mut summary = ValidationSummary {
            total: records.len(),
            valid: 0,
            invalid: 0,
            errors: Vec::new(),
        };
        for (index, record) in records.iter().enumerate() {
            match validate_record(index as u64, record) {
                Ok(_) => summary.valid += 1,
                Err(errors) => {
                    summary.invalid += 1;
                    summary.errors.extend(errors);
                }
            }
        }
        summary
    }

    /// Start executing an already persisted operation on a detached task.
    ///
    /// `records[i]` must correspond to the detail row with index `i`.
    pub fn launch(
        &self,
        operation: &BulkOperation,
        records: Vec<Value>,
        options: ProcessingOptions,
    ) -> OperationHandle {
        let path = options.execution_path(records.len());
        let pipeline = PipelineBuilder::from_options(&options, &self.deps).build();
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);

        self.active.insert(
            operation.id,
            ActiveOperation {
                cancel: cancel.clone(),
                finished: finished_rx,
            },
        );

        let run = OperationRun {
            operation_id: operation.id,
            organization_id: operation.organization_id.clone(),
            initiated_by: operation.initiated_by.clone(),
            records: Arc::new(records),
            options,
            pipeline,
            cancel,
        };

        debug!(
            operation_id = %operation.id,
            path = %path,
            stages = ?run.pipeline.stage_names(),
            "BULK: Launching operation"
        );

        let executor = self.executor.clone();
        let active = self.active.clone();
        let operation_id = operation.id;
        tokio::spawn(async move {
            executor.execute(run, path).await;
            active.remove(&operation_id);
            let _ = finished_tx.send(true);
        });

        self.handle_for(operation, path)
    }

    fn handle_for(&self, operation: &BulkOperation, path: ExecutionPath) -> OperationHandle {
        let base = self.config.api_base_path.trim_end_matches('/');
        OperationHandle {
            operation_id: operation.id,
            status: operation.status,
            execution_path: path,
            total_records: operation.total_records,
            status_url: format!("{base}/{}/status", operation.id),
            result_url: format!("{base}/{}/results", operation.id),
        }
    }

    pub async fn get_status(&self, operation_id: Uuid) -> Result<OperationStatusView> {
        let operation = self
            .store
            .get_by_id(operation_id)
            .await?
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        Ok(OperationStatusView::from_operation(
            &operation,
            chrono::Utc::now(),
        ))
    }

    pub async fn get_details(&self, operation_id: Uuid) -> Result<Vec<ProcessingDetail>> {
        if self.store.get_by_id(operation_id).await?.is_none() {
            return Err(EngineError::OperationNotFound(operation_id));
        }
        Ok(self.store.get_details_by_operation(operation_id).await?)
    }

    /// Cancel a non-terminal operation. In-flight records finish; no new
    /// records or chunks start.
    ///
    /// The status write is conditional on the operation still being active,
    /// so a run that finalizes concurrently keeps its terminal status and the
    /// caller gets `NotCancellable`.
    #[instrument(skip(self))]
    pub async fn cancel(&self, operation_id: Uuid) -> Result<OperationStatusView> {
        let operation = self
            .store
            .get_by_id(operation_id)
            .await?
            .ok_or(EngineError::OperationNotFound(operation_id))?;

        if !OperationStateMachine::can_transition(operation.status, OperationEvent::Cancel) {
            return Err(EngineError::NotCancellable {
                operation_id,
                status: operation.status.to_string(),
            });
        }

        let cancelled = self
            .store
            .transition_status(
                operation_id,
                &OperationStatus::NON_TERMINAL,
                OperationStatus::Cancelled,
            )
            .await?;
        if !cancelled {
            let current = self.get_status(operation_id).await?;
            return Err(EngineError::NotCancellable {
                operation_id,
                status: current.status.to_string(),
            });
        }

        if let Some(active) = self.active.get(&operation_id) {
            active.cancel.cancel();
        }
        log_operation("cancel", operation_id, OperationStatus::Cancelled, None);

        self.get_status(operation_id).await
    }

    pub fn is_active(&self, operation_id: Uuid) -> bool {
        self.active.contains_key(&operation_id)
    }

    /// Wait until the operation's task finishes or `timeout` elapses, then
    /// return the latest status.
    pub async fn wait_for_completion(
        &self,
        operation_id: Uuid,
        timeout: Duration,
    ) -> Result<OperationStatusView> {
        let receiver = self
            .active
            .get(&operation_id)
            .map(|active| active.finished.clone());

        if let Some(mut receiver) = receiver {
            let timed_out = tokio::time::timeout(timeout, receiver.wait_for(|done| *done))
                .await
                .is_err();
            if timed_out {
                debug!(operation_id = %operation_id, "BULK: Timed out waiting for completion");
            }
        }

        self.get_status(operation_id).await
    }

    /// Retry the transient failures of a terminal operation as a new operation.
    pub async fn retry_failed(&self, operation_id: Uuid) -> Result<RetryHandle> {
        RetryService::new(self.clone())
            .retry_failed(operation_id)
            .await
    }
}
