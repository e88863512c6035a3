//! # PostgreSQL Operation Store
//!
//! SQLx-backed [`OperationStore`]. Tables are created by
//! `migrations/0001_bulk_operations.sql`. Queries are built at runtime so
//! the crate compiles without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{OperationStore, ProgressCounters, StoreError, StoreResult};
use crate::models::{BulkOperation, DetailOutcome, InputFormat, ProcessingDetail};
use crate::orchestration::error_classifier::ErrorClassifier;
use crate::state_machine::{DetailStatus, OperationStatus};

/// Postgres bind parameter limit divided by the detail column count
const DETAIL_INSERT_CHUNK: usize = 65_535 / 8;

const OPERATION_COLUMNS: &str = "id, organization_id, initiated_by, input_format, status, \
     total_records, processed_records, successful_records, failed_records, skipped_records, \
     started_at, completed_at, metadata, result_file_url, error_summary, created_at, updated_at";

const DETAIL_COLUMNS: &str = "id, bulk_operation_id, record_index, status, input_data, \
     entity_id, identity_id, error_message, error_code, retry_count, processing_duration_ms, \
     metadata, created_at, processed_at";

#[derive(Debug, FromRow)]
struct OperationRow {
    id: Uuid,
    organization_id: String,
    initiated_by: String,
    input_format: String,
    status: String,
    total_records: i64,
    processed_records: i64,
    successful_records: i64,
    failed_records: i64,
    skipped_records: i64,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    metadata: Value,
    result_file_url: Option<String>,
    error_summary: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for BulkOperation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let input_format = row
            .input_format
            .parse::<InputFormat>()
            .map_err(|value| corrupt("bulk_operation", format!("input_format '{value}'")))?;
        let status = row
            .status
            .parse::<OperationStatus>()
            .map_err(|e| corrupt("bulk_operation", e))?;

        Ok(BulkOperation {
            id: row.id,
            organization_id: row.organization_id,
            initiated_by: row.initiated_by,
            input_format,
            status,
            total_records: to_u64(row.total_records),
            processed_records: to_u64(row.processed_records),
            successful_records: to_u64(row.successful_records),
            failed_records: to_u64(row.failed_records),
            skipped_records: to_u64(row.skipped_records),
            started_at: row.started_at,
            completed_at: row.completed_at,
            metadata: into_map(row.metadata),
            result_file_url: row.result_file_url,
            error_summary: row.error_summary,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DetailRow {
    id: Uuid,
    bulk_operation_id: Uuid,
    record_index: i64,
    status: String,
    input_data: Value,
    entity_id: Option<String>,
    identity_id: Option<String>,
    error_message: Option<String>,
    error_code: Option<String>,
    retry_count: i32,
    processing_duration_ms: Option<i64>,
    metadata: Value,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DetailRow> for ProcessingDetail {
    type Error = StoreError;

    fn try_from(row: DetailRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<DetailStatus>()
            .map_err(|e| corrupt("processing_detail", e))?;

        Ok(ProcessingDetail {
            id: row.id,
            bulk_operation_id: row.bulk_operation_id,
            record_index: to_u64(row.record_index),
            status,
            input_data: row.input_data,
            entity_id: row.entity_id,
            identity_id: row.identity_id,
            error_message: row.error_message,
            error_code: row.error_code,
            retry_count: row.retry_count.max(0) as u32,
            processing_duration_ms: row.processing_duration_ms.map(to_u64),
            metadata: into_map(row.metadata),
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

fn corrupt(entity: &'static str, message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        entity,
        message: message.into(),
    }
}

fn db_error(operation: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::database(operation, e.to_string())
}

fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone)]
pub struct PgOperationStore {
    pool: PgPool,
}

impl PgOperationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(db_error("connect"))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn not_found(id: Uuid) -> StoreError {
        StoreError::NotFound {
            entity: "bulk_operation",
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl OperationStore for PgOperationStore {
    #[instrument(skip(self, operation), fields(operation_id = %operation.id))]
    async fn create_operation(&self, operation: &BulkOperation) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO bulk_operations (
                id, organization_id, initiated_by, input_format, status,
                total_records, processed_records, successful_records, failed_records,
                skipped_records, started_at, completed_at, metadata, result_file_url,
                error_summary, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(operation.id)
        .bind(&operation.organization_id)
        .bind(&operation.initiated_by)
        .bind(operation.input_format.to_string())
        .bind(operation.status.to_string())
        .bind(to_i64(operation.total_records))
        .bind(to_i64(operation.processed_records))
        .bind(to_i64(operation.successful_records))
        .bind(to_i64(operation.failed_records))
        .bind(to_i64(operation.skipped_records))
        .bind(operation.started_at)
        .bind(operation.completed_at)
        .bind(Value::Object(operation.metadata.clone()))
        .bind(&operation.result_file_url)
        .bind(&operation.error_summary)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Duplicate {
                entity: "bulk_operation",
                id: operation.id.to_string(),
            }),
            Err(e) => Err(db_error("create_operation")(e)),
        }
    }

    #[instrument(skip(self, details), fields(count = details.len()))]
    async fn create_details_batch(&self, details: &[ProcessingDetail]) -> StoreResult<()> {
        if details.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("create_details_batch"))?;

        for chunk in details.chunks(DETAIL_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO bulk_processing_details \
                 (id, bulk_operation_id, record_index, status, input_data, retry_count, metadata, created_at) ",
            );
            builder.push_values(chunk, |mut row, detail| {
                row.push_bind(detail.id)
                    .push_bind(detail.bulk_operation_id)
                    .push_bind(to_i64(detail.record_index))
                    .push_bind(detail.status.to_string())
                    .push_bind(detail.input_data.clone())
                    .push_bind(i32::try_from(detail.retry_count).unwrap_or(i32::MAX))
                    .push_bind(Value::Object(detail.metadata.clone()))
                    .push_bind(detail.created_at);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_error("create_details_batch"))?;
        }

        tx.commit().await.map_err(db_error("create_details_batch"))?;
        debug!(count = details.len(), "Inserted processing details");
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: &[OperationStatus],
        to: OperationStatus,
    ) -> StoreResult<bool> {
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = $2,
                started_at = CASE WHEN $2 = 'processing' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(to.to_string())
        .bind(to.is_terminal())
        .bind(&expected)
        .execute(&self.pool)
        .await
        .map_err(db_error("transition_status"))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM bulk_operations WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("transition_status"))?;
        if exists {
            Ok(false)
        } else {
            Err(Self::not_found(id))
        }
    }

    async fn update_progress(&self, id: Uuid, counters: ProgressCounters) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET processed_records = LEAST($2, total_records),
                successful_records = $3,
                failed_records = $4,
                skipped_records = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(to_i64(counters.processed))
        .bind(to_i64(counters.successful))
        .bind(to_i64(counters.failed))
        .bind(to_i64(counters.skipped))
        .execute(&self.pool)
        .await
        .map_err(db_error("update_progress"))?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<BulkOperation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM bulk_operations WHERE id = $1");
        sqlx::query_as::<_, OperationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get_by_id"))?
            .map(BulkOperation::try_from)
            .transpose()
    }

    async fn get_details_by_operation(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>> {
        let sql = format!(
            "SELECT {DETAIL_COLUMNS} FROM bulk_processing_details \
             WHERE bulk_operation_id = $1 ORDER BY record_index"
        );
        sqlx::query_as::<_, DetailRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("get_details_by_operation"))?
            .into_iter()
            .map(ProcessingDetail::try_from)
            .collect()
    }

    async fn get_retryable_details(&self, id: Uuid) -> StoreResult<Vec<ProcessingDetail>> {
        let sql = format!(
            "SELECT {DETAIL_COLUMNS} FROM bulk_processing_details \
             WHERE bulk_operation_id = $1 AND status = 'failed' ORDER BY record_index"
        );
        let rows = sqlx::query_as::<_, DetailRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("get_retryable_details"))?;

        let mut details = Vec::with_capacity(rows.len());
        for row in rows {
            let detail = ProcessingDetail::try_from(row)?;
            if ErrorClassifier::is_retryable(detail.error_code.as_deref()) {
                details.push(detail);
            }
        }
        Ok(details)
    }

    async fn update_detail(
        &self,
        operation_id: Uuid,
        record_index: u64,
        outcome: &DetailOutcome,
        duration_ms: u64,
    ) -> StoreResult<()> {
        let (entity_id, identity_id, message, code) = match outcome {
            DetailOutcome::Success {
                entity_id,
                identity_id,
            } => (entity_id.clone(), identity_id.clone(), None, None),
            DetailOutcome::Failed { message, code } => {
                (None, None, Some(message.clone()), Some(code.clone()))
            }
        };

        let result = sqlx::query(
            r#"
            UPDATE bulk_processing_details
            SET status = $3,
                entity_id = $4,
                identity_id = $5,
                error_message = $6,
                error_code = $7,
                processing_duration_ms = $8,
                processed_at = NOW()
            WHERE bulk_operation_id = $1 AND record_index = $2
            "#,
        )
        .bind(operation_id)
        .bind(to_i64(record_index))
        .bind(outcome.status().to_string())
        .bind(entity_id)
        .bind(identity_id)
        .bind(message)
        .bind(code)
        .bind(to_i64(duration_ms))
        .execute(&self.pool)
        .await
        .map_err(db_error("update_detail"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "processing_detail",
                id: format!("{operation_id}#{record_index}"),
            });
        }
        Ok(())
    }

    async fn set_error_summary(&self, id: Uuid, summary: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE bulk_operations SET error_summary = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(summary)
        .execute(&self.pool)
        .await
        .map_err(db_error("set_error_summary"))?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}
