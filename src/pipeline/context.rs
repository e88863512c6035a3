//! # Processing Context
//!
//! Per-record scratch state owned by exactly one pipeline run. Stages read
//! the raw input and publish named results for later stages to consume.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub operation_id: Uuid,
    pub organization_id: String,
    pub initiated_by: String,
    pub record_index: u64,
    pub input: Value,
    stage_results: HashMap<String, Value>,
}

impl ProcessingContext {
    pub fn new(
        operation_id: Uuid,
        organization_id: impl Into<String>,
        initiated_by: impl Into<String>,
        record_index: u64,
        input: Value,
    ) -> Self {
        Self {
            operation_id,
            organization_id: organization_id.into(),
            initiated_by: initiated_by.into(),
            record_index,
            input,
            stage_results: HashMap::new(),
        }
    }

    pub fn publish(&mut self, stage: &str, result: Value) {
        self.stage_results.insert(stage.to_string(), result);
    }

    pub fn stage_result(&self, stage: &str) -> Option<&Value> {
        self.stage_results.get(stage)
    }

    /// String field `field` of the result published by `stage`.
    pub fn stage_field(&self, stage: &str, field: &str) -> Option<&str> {
        self.stage_results
            .get(stage)
            .and_then(|v| v.get(field))
            .and_then(Value::as_str)
    }

    /// Trimmed, non-empty string field of the raw input.
    pub fn input_str(&self, field: &str) -> Option<&str> {
        self.input
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn completed_stages(&self) -> impl Iterator<Item = &str> {
        self.stage_results.keys().map(String::as_str)
    }
}
