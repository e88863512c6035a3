//! # Persistence Contracts
//!
//! The engine only depends on these repository traits. `memory` provides the
//! in-process implementation used by tests and single-node deployments;
//! `postgres` (feature `postgres`) backs the operation store with SQLx.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    BulkOperation, DetailOutcome, ProcessingDetail, RegisteredEntity,
};
use crate::state_machine::OperationStatus;

pub use memory::{InMemoryEntityStore, InMemoryOperationStore};
#[cfg(feature = "postgres")]
pub use postgres::PgOperationStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate record: {entity} {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("Database error during {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Transaction aborted during {operation}: {message}")]
    TransactionAborted { operation: String, message: String },

    #[error("Corrupt row in {entity}: {message}")]
    Corrupt { entity: &'static str, message: String },
}

impl StoreError {
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Aggregate counters written by the progress aggregator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Durable store for bulk operations and their processing details.
#[async_trait]
pub trait OperationStore: Send + Sync {
    async fn create_operation(&self, operation: &BulkOperation) -> StoreResult<()>;

    /// Insert all detail rows for an operation in one batch write.
    async fn create_details_batch(&self, details: &[ProcessingDetail]) -> StoreResult<()>;

    /// Compare-and-set: move to `to` only while the current status is one of
    /// `expected`. Returns `false` when the status had already moved on.
    /// `Processing` stamps `started_at`, terminal states stamp `completed_at`.
    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[OperationStatus],
        to: OperationStatus,
    ) -> StoreResult<bool>;

    async fn update_progress(&self, id: Uuid, counters: ProgressCounters) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<BulkOperation>>;

    async fn get_details_by_operation(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>>;

    /// Failed details of `id` whose error code is retryable, ordered by index.
    async fn get_retryable_details(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>>;

    /// Single terminal write for the detail at `record_index`.
    async fn update_detail(
        &self,
        operation_id: Uuid,
        record_index: u64,
        outcome: &DetailOutcome,
        duration_ms: u64,
    ) -> StoreResult<()>;

    async fn set_error_summary(&self, id: Uuid, summary: &str) -> StoreResult<()>;
}

/// Local registered-entity records scanned by the pipeline and reconciliation.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_by_phone(
        &self,
        organization_id: &str,
        phone: &str,
    ) -> StoreResult<Option<RegisteredEntity>>;

    async fn insert_entity(&self, entity: &RegisteredEntity) -> StoreResult<()>;

    async fn get_entity(&self, id: &str) -> StoreResult<Option<RegisteredEntity>>;

    // The list_* scans are keyset pages ordered by id: at most `limit` rows
    // with an id strictly greater than `after`.

    /// Entities linked to an external identity.
    async fn list_linked_entities(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RegisteredEntity>>;

    async fn list_role_pending(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RegisteredEntity>>;

    async fn list_secondary_link_pending(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RegisteredEntity>>;

    async fn count_role_pending(&self) -> StoreResult<u64>;

    async fn count_secondary_link_pending(&self) -> StoreResult<u64>;

    async fn count_entities(&self) -> StoreResult<u64>;

    async fn clear_role_pending(&self, id: &str, fixed_at: DateTime<Utc>) -> StoreResult<()>;

    async fn acknowledge_secondary_link(
        &self,
        id: &str,
        acknowledged_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Delete the entity and every dependent inside one transaction,
    /// deepest dependents first. Returns the number of rows removed.
    async fn delete_entity_cascade(&self, id: &str) -> StoreResult<u64>;
}
