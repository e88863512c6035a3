#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Bulk Engine Core
//!
//! Bulk registration engine: accepts batches of parsed records, runs every
//! record through a staged processing pipeline and tracks the batch as one
//! durable operation with live progress, cancellation and targeted retries.
//! A companion reconciliation job keeps local records in step with the
//! external identity authority.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Intake, inline and chunked execution, progress aggregation, retry
//! - [`pipeline`] - Ordered per-record processing stages
//! - [`reconciliation`] - Orphan cleanup, role healing and secondary-link sweeps
//! - [`state_machine`] - Operation lifecycle rules
//! - [`store`] - Operation and entity persistence contracts (memory and PostgreSQL)
//! - [`identity`] - Identity authority contract
//! - [`config`] - YAML configuration with environment overlays
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bulk_engine::config::BulkConfig;
//! use bulk_engine::identity::InMemoryIdentityAuthority;
//! use bulk_engine::models::InputFormat;
//! use bulk_engine::orchestration::{BulkOrchestrator, ProcessingOptions};
//! use bulk_engine::store::{InMemoryEntityStore, InMemoryOperationStore};
//!
//! # async fn example() -> bulk_engine::Result<()> {
//! let orchestrator = BulkOrchestrator::new(
//!     Arc::new(InMemoryOperationStore::new()),
//!     Arc::new(InMemoryEntityStore::new()),
//!     Arc::new(InMemoryIdentityAuthority::new()),
//!     BulkConfig::default(),
//! );
//!
//! let records = vec![serde_json::json!({"name": "Asha", "phone": "9876543210"})];
//! let outcome = orchestrator
//!     .submit("org-1", "admin", InputFormat::Json, records, ProcessingOptions::default())
//!     .await?;
//! println!("accepted: {:?}", outcome.handle());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod pipeline;
pub mod reconciliation;
pub mod state_machine;
pub mod store;

pub use config::{BulkConfig, ConfigManager, EngineConfig, ReconciliationConfig};
pub use error::{EngineError, Result};
pub use identity::{IdentityAuthority, IdentityError};
pub use models::{BulkOperation, InputFormat, ProcessingDetail, RegisteredEntity};
pub use orchestration::{
    BulkOrchestrator, OperationHandle, OperationStatusView, ProcessingMode, ProcessingOptions,
    RetryHandle, SubmitOutcome,
};
pub use reconciliation::{PendingCounts, ReconciliationJob, ReconciliationReport};
pub use state_machine::{DetailStatus, OperationStatus};
pub use store::{EntityStore, OperationStore, ProgressCounters, StoreError};
