#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use bulk_engine::config::BulkConfig;
use bulk_engine::identity::InMemoryIdentityAuthority;
use bulk_engine::models::InputFormat;
use bulk_engine::orchestration::{
    BulkOrchestrator, OperationHandle, OperationStatusView, ProcessingOptions,
};
use bulk_engine::store::{InMemoryEntityStore, InMemoryOperationStore};
use serde_json::{json, Value};

pub const ORG: &str = "org-1";
pub const ADMIN: &str = "admin-1";
pub const WAIT: Duration = Duration::from_secs(10);

/// Orchestrator wired to in-memory collaborators the test can poke at
pub struct Harness {
    pub orchestrator: BulkOrchestrator,
    pub store: Arc<InMemoryOperationStore>,
    pub entities: Arc<InMemoryEntityStore>,
    pub identity: Arc<InMemoryIdentityAuthority>,
}

/// Fast timings for tests; inline for up to 5 records.
pub fn test_config() -> BulkConfig {
    BulkConfig {
        chunk_size: 4,
        max_concurrency: 3,
        max_sync_records: 5,
        progress_flush_interval_ms: 20,
        small_batch_grace_ms: 0,
        role_verification_attempts: 2,
        role_verification_delay_ms: 1,
        ..Default::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: BulkConfig) -> Self {
        let store = Arc::new(InMemoryOperationStore::new());
        let entities = Arc::new(InMemoryEntityStore::new());
        let identity = Arc::new(InMemoryIdentityAuthority::new());
        let orchestrator =
            BulkOrchestrator::new(store.clone(), entities.clone(), identity.clone(), config);
        Self {
            orchestrator,
            store,
            entities,
            identity,
        }
    }

    pub async fn submit(&self, records: Vec<Value>, options: ProcessingOptions) -> OperationHandle {
        self.orchestrator
            .submit(ORG, ADMIN, InputFormat::Csv, records, options)
            .await
            .expect("submission accepted")
            .handle()
            .cloned()
            .expect("operation handle")
    }

    pub async fn run(&self, records: Vec<Value>, options: ProcessingOptions) -> OperationStatusView {
        let handle = self.submit(records, options).await;
        self.orchestrator
            .wait_for_completion(handle.operation_id, WAIT)
            .await
            .expect("status available")
    }
}

/// Valid record with a phone unique per `i`
pub fn record(i: usize) -> Value {
    json!({
        "name": format!("Farmer {i}"),
        "phone": format!("98{i:08}"),
    })
}

pub fn records(count: usize) -> Vec<Value> {
    (0..count).map(record).collect()
}

pub fn invalid_record() -> Value {
    json!({"name": "", "phone": "12345"})
}
