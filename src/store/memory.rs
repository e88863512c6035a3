//! In-memory store implementations
//!
//! Lock-protected maps implementing [`OperationStore`] and [`EntityStore`].
//! Cascade deletes stage every removal on a working copy and only swap it in
//! once all rows are gone, so an injected mid-delete fault leaves the data
//! untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::{EntityStore, OperationStore, ProgressCounters, StoreError, StoreResult};
use crate::constants::metadata_keys;
use crate::models::{
    BulkOperation, DependentRecord, DetailOutcome, ProcessingDetail, RegisteredEntity,
};
use crate::orchestration::error_classifier::ErrorClassifier;
use crate::state_machine::{DetailStatus, OperationStatus};

#[derive(Default)]
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<Uuid, BulkOperation>>,
    details: RwLock<HashMap<Uuid, BTreeMap<u64, ProcessingDetail>>>,
    fail_detail_batches: AtomicBool,
    fail_progress_updates: AtomicBool,
    progress_writes: AtomicU64,
    detail_writes: AtomicU64,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_details_batch` calls fail.
    pub fn fail_detail_batches(&self, fail: bool) {
        self.fail_detail_batches.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `update_progress` calls fail.
    pub fn fail_progress_updates(&self, fail: bool) {
        self.fail_progress_updates.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `update_progress` writes so far.
    pub fn progress_write_count(&self) -> u64 {
        self.progress_writes.load(Ordering::SeqCst)
    }

    /// Number of successful `update_detail` writes so far.
    pub fn detail_write_count(&self) -> u64 {
        self.detail_writes.load(Ordering::SeqCst)
    }

    pub fn operation_count(&self) -> usize {
        self.operations.read().len()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn create_operation(&self, operation: &BulkOperation) -> StoreResult<()> {
        let mut operations = self.operations.write();
        if operations.contains_key(&operation.id) {
            return Err(StoreError::Duplicate {
                entity: "bulk_operation",
                id: operation.id.to_string(),
            });
        }
        operations.insert(operation.id, operation.clone());
        Ok(())
    }

    async fn create_details_batch(&self, details: &[ProcessingDetail]) -> StoreResult<()> {
        if self.fail_detail_batches.load(Ordering::SeqCst) {
            return Err(StoreError::database(
                "create_details_batch",
                "injected batch insert failure",
            ));
        }

        let mut all = self.details.write();
        for detail in details {
            let rows = all.entry(detail.bulk_operation_id).or_default();
            if rows.contains_key(&detail.record_index) {
                return Err(StoreError::Duplicate {
                    entity: "processing_detail",
                    id: format!("{}#{}", detail.bulk_operation_id, detail.record_index),
                });
            }
            rows.insert(detail.record_index, detail.clone());
        }
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[OperationStatus],
        to: OperationStatus,
    ) -> StoreResult<bool> {
        let mut operations = self.operations.write();
        let operation = operations.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "bulk_operation",
            id: id.to_string(),
        })?;
        if !expected.contains(&operation.status) {
            return Ok(false);
        }

        let now = Utc::now();
        operation.status = to;
        operation.updated_at = now;
        if to == OperationStatus::Processing && operation.started_at.is_none() {
            operation.started_at = Some(now);
        }
        if to.is_terminal() {
            operation.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn update_progress(&self, id: Uuid, counters: ProgressCounters) -> StoreResult<()> {
        if self.fail_progress_updates.load(Ordering::SeqCst) {
            return Err(StoreError::database(
                "update_progress",
                "injected progress write failure",
            ));
        }

        let mut operations = self.operations.write();
        let operation = operations.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "bulk_operation",
            id: id.to_string(),
        })?;
        operation.processed_records = counters.processed.min(operation.total_records);
        operation.successful_records = counters.successful;
        operation.failed_records = counters.failed;
        operation.skipped_records = counters.skipped;
        operation.updated_at = Utc::now();
        self.progress_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<BulkOperation>> {
        Ok(self.operations.read().get(&id).cloned())
    }

    async fn get_details_by_operation(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>> {
        Ok(self
            .details
            .read()
            .get(&id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_retryable_details(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>> {
        Ok(self
            .details
            .read()
            .get(&id)
            .map(|rows| {
                rows.values()
                    .filter(|d| d.status == DetailStatus::Failed)
                    .filter(|d| ErrorClassifier::is_retryable(d.error_code.as_deref()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_detail(
        &self,
        operation_id: Uuid,
        record_index: u64,
        outcome: &DetailOutcome,
        duration_ms: u64,
    ) -> StoreResult<()> {
        let mut all = self.details.write();
        let detail = all
            .get_mut(&operation_id)
            .and_then(|rows| rows.get_mut(&record_index))
            .ok_or_else(|| StoreError::NotFound {
                entity: "processing_detail",
                id: format!("{operation_id}#{record_index}"),
            })?;
        detail.apply_outcome(outcome, duration_ms);
        self.detail_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_error_summary(&self, id: Uuid, summary: &str) -> StoreResult<()> {
        let mut operations = self.operations.write();
        let operation = operations.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "bulk_operation",
            id: id.to_string(),
        })?;
        operation.error_summary = Some(summary.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct EntityTables {
    entities: BTreeMap<String, RegisteredEntity>,
    dependents: Vec<DependentRecord>,
}

#[derive(Default)]
pub struct InMemoryEntityStore {
    tables: RwLock<EntityTables>,
    /// Abort a cascade delete after this many row removals.
    fail_delete_after: Mutex<Option<usize>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dependent(&self, dependent: DependentRecord) {
        self.tables.write().dependents.push(dependent);
    }

    pub fn dependents_of(&self, entity_id: &str) -> Vec<DependentRecord> {
        self.tables
            .read()
            .dependents
            .iter()
            .filter(|d| d.entity_id == entity_id)
            .cloned()
            .collect()
    }

    /// Inject a fault into the next cascade delete after `rows` removals.
    pub fn fail_next_delete_after(&self, rows: usize) {
        *self.fail_delete_after.lock() = Some(rows);
    }

    fn set_metadata(
        &self,
        id: &str,
        clear: &str,
        stamp: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let entity = tables
            .entities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "registered_entity",
                id: id.to_string(),
            })?;
        entity.metadata.remove(clear);
        entity
            .metadata
            .insert(stamp.to_string(), Value::String(at.to_rfc3339()));
        entity.updated_at = at;
        Ok(())
    }

    fn list_where(
        &self,
        after: Option<&str>,
        limit: usize,
        predicate: impl Fn(&RegisteredEntity) -> bool,
    ) -> Vec<RegisteredEntity> {
        let lower = match after {
            Some(id) => Bound::Excluded(id.to_string()),
            None => Bound::Unbounded,
        };
        self.tables
            .read()
            .entities
            .range((lower, Bound::Unbounded))
            .map(|(_, e)| e)
            .filter(|e| predicate(*e))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_by_phone(
        &self,
        organization_id: &str,
        phone: &str,
    ) -> StoreResult<Option<RegisteredEntity>> {
        Ok(self
            .tables
            .read()
            .entities
            .values()
            .find(|e| e.organization_id == organization_id && e.phone == phone)
            .cloned())
    }

    async fn insert_entity(&self, entity: &RegisteredEntity) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if tables.entities.contains_key(&entity.id) {
            return Err(StoreError::Duplicate {
                entity: "registered_entity",
                id: entity.id.clone(),
            });
        }
        // Unique (organization, phone), checked under the same write lock
        if tables.entities.values().any(|e| {
            e.organization_id == entity.organization_id && e.phone == entity.phone
        }) {
            return Err(StoreError::Duplicate {
                entity: "registered_entity",
                id: format!("{}/{}", entity.organization_id, entity.phone),
            });
        }
        tables.entities.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> StoreResult<Option<RegisteredEntity>> {
        Ok(self.tables.read().entities.get(id).cloned())
    }

    async fn list_linked_entities(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RegisteredEntity>> {
        Ok(self.list_where(after, limit, |e| e.identity_id.is_some()))
    }

    async fn list_role_pending(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RegisteredEntity>> {
        Ok(self.list_where(after, limit, RegisteredEntity::role_assignment_pending))
    }

    async fn list_secondary_link_pending(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<RegisteredEntity>> {
        Ok(self.list_where(after, limit, RegisteredEntity::secondary_link_pending))
    }

    async fn count_role_pending(&self) -> StoreResult<u64> {
        Ok(self
            .tables
            .read()
            .entities
            .values()
            .filter(|e| e.role_assignment_pending())
            .count() as u64)
    }

    async fn count_secondary_link_pending(&self) -> StoreResult<u64> {
        Ok(self
            .tables
            .read()
            .entities
            .values()
            .filter(|e| e.secondary_link_pending())
            .count() as u64)
    }

    async fn count_entities(&self) -> StoreResult<u64> {
        Ok(self.tables.read().entities.len() as u64)
    }

    async fn clear_role_pending(&self, id: &str, fixed_at: DateTime<Utc>) -> StoreResult<()> {
        self.set_metadata(
            id,
            metadata_keys::ROLE_ASSIGNMENT_PENDING,
            metadata_keys::ROLE_ASSIGNMENT_FIXED_AT,
            fixed_at,
        )
    }

    async fn acknowledge_secondary_link(
        &self,
        id: &str,
        acknowledged_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.set_metadata(
            id,
            metadata_keys::SECONDARY_LINK_PENDING,
            metadata_keys::SECONDARY_LINK_ACKNOWLEDGED_AT,
            acknowledged_at,
        )
    }

    async fn delete_entity_cascade(&self, id: &str) -> StoreResult<u64> {
        let fail_after = self.fail_delete_after.lock().take();
        let mut tables = self.tables.write();

        if !tables.entities.contains_key(id) {
            return Err(StoreError::NotFound {
                entity: "registered_entity",
                id: id.to_string(),
            });
        }

        // Stage the deletes on a copy; commit by swapping.
        let mut staged = tables.clone();
        let mut children: Vec<DependentRecord> = staged
            .dependents
            .iter()
            .filter(|d| d.entity_id == id)
            .cloned()
            .collect();
        children.sort_by(|a, b| b.depth.cmp(&a.depth));

        let mut removed = 0usize;
        for child in &children {
            if fail_after == Some(removed) {
                return Err(StoreError::TransactionAborted {
                    operation: "delete_entity_cascade".to_string(),
                    message: format!("failed deleting {} {}", child.kind, child.id),
                });
            }
            staged.dependents.retain(|d| d.id != child.id);
            removed += 1;
        }

        if fail_after == Some(removed) {
            return Err(StoreError::TransactionAborted {
                operation: "delete_entity_cascade".to_string(),
                message: format!("failed deleting registered_entity {id}"),
            });
        }
        staged.entities.remove(id);
        removed += 1;

        *tables = staged;
        debug!(entity_id = %id, rows = removed, "Cascade delete committed");
        Ok(removed as u64)
    }
}
