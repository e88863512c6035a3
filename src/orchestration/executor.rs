//! # Operation Executor
//!
//! Drives one bulk operation from `Pending` to a terminal status. The
//! per-record step ([`OperationExecutor::process_record`]) is shared by the
//! inline path and the chunk workers, so a record is processed and its detail
//! row written the same way regardless of the path.
//!
//! Status writes are best-effort: failures are logged and processing
//! continues. The authoritative outcome is the set of detail rows.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::chunk_scheduler::ChunkScheduler;
use super::options::{ExecutionPath, ProcessingOptions};
use super::progress::{ProgressAggregator, ProgressEvent};
use crate::config::BulkConfig;
use crate::logging::log_operation;
use crate::models::DetailOutcome;
use crate::pipeline::stages::{ENTITY_PERSIST, IDENTITY_PROVISIONING};
use crate::pipeline::{Pipeline, ProcessingContext};
use crate::state_machine::{OperationEvent, OperationStateMachine, OperationStatus};
use crate::store::{OperationStore, ProgressCounters};

/// Everything a worker needs to process records of one operation
#[derive(Debug, Clone)]
pub struct OperationRun {
    pub operation_id: Uuid,
    pub organization_id: String,
    pub initiated_by: String,
    /// Input payloads; position is the record index
    pub records: Arc<Vec<Value>>,
    pub options: ProcessingOptions,
    pub pipeline: Pipeline,
    pub cancel: CancellationToken,
}

impl OperationRun {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// Result of processing one record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub record_index: u64,
    pub outcome: DetailOutcome,
    pub duration_ms: u64,
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn progress_event(&self) -> ProgressEvent {
        ProgressEvent::from_outcome(&self.outcome)
    }
}

#[derive(Clone)]
pub struct OperationExecutor {
    store: Arc<dyn OperationStore>,
    config: BulkConfig,
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("config", &self.config)
            .finish()
    }
}

impl OperationExecutor {
    pub fn new(store: Arc<dyn OperationStore>, config: BulkConfig) -> Self {
        Self { store, config }
    }

    /// Run `run` to completion along `path` and finalize its status.
    ///
    /// Returns the terminal status written, or `None` when the operation was
    /// cancelled or had already left the active states.
    #[instrument(skip(self, run), fields(operation_id = %run.operation_id, path = %path))]
    pub async fn execute(&self, run: OperationRun, path: ExecutionPath) -> Option<OperationStatus> {
        if !self.start(&run).await {
            return None;
        }

        let counters = match path {
            ExecutionPath::Inline => self.run_inline(&run).await,
            ExecutionPath::Chunked => self.run_chunked(&run).await,
        };

        self.finalize(&run, counters).await
    }

    /// Process one record and write its detail row exactly once.
    pub async fn process_record(&self, run: &OperationRun, index: usize) -> RecordOutcome {
        let started = Instant::now();
        let input = run.records.get(index).cloned().unwrap_or(Value::Null);
        let mut ctx = ProcessingContext::new(
            run.operation_id,
            run.organization_id.as_str(),
            run.initiated_by.as_str(),
            index as u64,
            input,
        );

        let outcome = match run.pipeline.execute(&mut ctx).await {
            Ok(()) => DetailOutcome::Success {
                entity_id: ctx.stage_field(ENTITY_PERSIST, "entity_id").map(str::to_string),
                identity_id: ctx
                    .stage_field(IDENTITY_PROVISIONING, "identity_id")
                    .map(str::to_string),
            },
            Err(e) => DetailOutcome::Failed {
                message: e.to_string(),
                code: e.error_code().to_string(),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = self
            .store
            .update_detail(run.operation_id, index as u64, &outcome, duration_ms)
            .await
        {
            warn!(
                operation_id = %run.operation_id,
                record_index = index,
                error = %e,
                "BULK: Failed to record processing detail"
            );
        }

        RecordOutcome {
            record_index: index as u64,
            outcome,
            duration_ms,
        }
    }

    /// Sequential path: one record at a time in input order.
    pub async fn run_inline(&self, run: &OperationRun) -> ProgressCounters {
        let flush_every = self.config.inline_flush_every.max(1) as u64;
        let mut counters = ProgressCounters::default();

        for index in 0..run.record_count() {
            if run.cancel.is_cancelled() {
                info!(
                    operation_id = %run.operation_id,
                    processed = counters.processed,
                    "BULK: Cancellation observed, stopping inline run"
                );
                break;
            }

            let result = self.process_record(run, index).await;
            result.progress_event().apply_to(&mut counters);

            if counters.processed % flush_every == 0 {
                self.flush_progress(run.operation_id, counters).await;
            }

            if !result.is_success() && !run.options.continue_on_error {
                info!(
                    operation_id = %run.operation_id,
                    record_index = index,
                    "BULK: Stopping at first failure (continue_on_error=false)"
                );
                break;
            }
        }

        self.flush_progress(run.operation_id, counters).await;
        counters
    }

    /// Chunked path: bounded-parallel chunk workers feeding the aggregator.
    pub async fn run_chunked(&self, run: &OperationRun) -> ProgressCounters {
        let (sender, aggregator) = ProgressAggregator::channel(
            run.operation_id,
            self.store.clone(),
            self.config.progress_channel_capacity,
            self.config.progress_flush_interval(),
        );
        let aggregator = aggregator.spawn();

        let scheduler = ChunkScheduler::new(run.options.max_concurrency);
        let summary = scheduler
            .run(self.clone(), Arc::new(run.clone()), sender)
            .await;

        match aggregator.await {
            Ok(counters) => counters,
            Err(e) => {
                error!(
                    operation_id = %run.operation_id,
                    error = %e,
                    "PROGRESS: Aggregator task failed, using chunk totals"
                );
                let counters = summary.counters();
                self.flush_progress(run.operation_id, counters).await;
                counters
            }
        }
    }

    async fn start(&self, run: &OperationRun) -> bool {
        if run.cancel.is_cancelled() {
            debug!(operation_id = %run.operation_id, "BULK: Cancelled before start");
            return false;
        }

        match self
            .store
            .transition_status(
                run.operation_id,
                &[OperationStatus::Pending],
                OperationStatus::Processing,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(operation_id = %run.operation_id, "BULK: Operation no longer startable");
                return false;
            }
            Err(e) => warn!(
                operation_id = %run.operation_id,
                error = %e,
                "BULK: Failed to mark operation processing"
            ),
        }

        log_operation(
            "start",
            run.operation_id,
            OperationStatus::Processing,
            Some(&format!("{} records", run.record_count())),
        );
        true
    }

    async fn finalize(
        &self,
        run: &OperationRun,
        counters: ProgressCounters,
    ) -> Option<OperationStatus> {
        if run.cancel.is_cancelled() {
            info!(
                operation_id = %run.operation_id,
                processed = counters.processed,
                "BULK: Operation cancelled, leaving status untouched"
            );
            return None;
        }

        let event = OperationEvent::Finish {
            successful: counters.successful,
            failed: counters.failed,
        };
        let status = match OperationStateMachine::transition(OperationStatus::Processing, event) {
            Ok(status) => status,
            Err(e) => {
                error!(operation_id = %run.operation_id, error = %e, "BULK: Invalid finalization");
                return None;
            }
        };

        // Pending is accepted in case the start write failed
        match self
            .store
            .transition_status(run.operation_id, &OperationStatus::NON_TERMINAL, status)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(operation_id = %run.operation_id, "BULK: Operation already terminal");
                return None;
            }
            Err(e) => {
                error!(
                    operation_id = %run.operation_id,
                    status = %status,
                    error = %e,
                    "BULK: Failed to write operation status"
                );
                return None;
            }
        }

        if counters.failed > 0 {
            let summary = format!(
                "{} of {} processed records failed",
                counters.failed, counters.processed
            );
            if let Err(e) = self.store.set_error_summary(run.operation_id, &summary).await {
                warn!(operation_id = %run.operation_id, error = %e, "BULK: Failed to store error summary");
            }
        }

        info!(
            operation_id = %run.operation_id,
            status = %status,
            processed = counters.processed,
            successful = counters.successful,
            failed = counters.failed,
            "BULK: ✅ Operation finished"
        );
        Some(status)
    }

    async fn flush_progress(&self, operation_id: Uuid, counters: ProgressCounters) {
        if let Err(e) = self.store.update_progress(operation_id, counters).await {
            warn!(
                operation_id = %operation_id,
                error = %e,
                "PROGRESS: Failed to flush counters"
            );
        }
    }
}
