//! # Bulk Orchestration
//!
//! Intake, execution and retry of bulk operations.
//!
//! ```text
//! submit ──▶ BulkOrchestrator ──▶ OperationExecutor ─┬─ inline: record by record
//!                                                    └─ chunked: ChunkScheduler ──▶ ProgressAggregator
//! retry_failed ──▶ RetryService ──▶ new operation ──▶ same paths
//! ```

pub mod chunk_scheduler;
pub mod error_classifier;
pub mod executor;
pub mod options;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod status;

pub use chunk_scheduler::{partition, ChunkReport, ChunkScheduler, ChunkSummary};
pub use error_classifier::{ErrorCategory, ErrorClassifier};
pub use executor::{OperationExecutor, OperationRun, RecordOutcome};
pub use options::{ExecutionPath, ProcessingMode, ProcessingOptions};
pub use orchestrator::{
    parse_input_format, BulkOrchestrator, OperationHandle, SubmitOutcome, ValidationSummary,
};
pub use progress::{ProgressAggregator, ProgressEvent, ProgressSender};
pub use retry::{retry_details, RetryHandle, RetryService};
pub use status::OperationStatusView;
