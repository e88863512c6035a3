//! Processing options supplied with a bulk submission.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::BulkConfig;

/// Requested processing mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Inline for batches up to `max_sync_records`, chunked above
    #[default]
    Auto,
    /// Always inline
    Sync,
    Async,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// Execution path actually chosen for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Inline,
    Chunked,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Chunked => write!(f, "chunked"),
        }
    }
}

/// Per-submission options. Zero sizes mean "use the configured default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub mode: ProcessingMode,
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub max_sync_records: usize,
    pub continue_on_error: bool,
    pub validate_only: bool,
    pub skip_duplicate_detection: bool,
    pub skip_role_assignment: bool,
    pub skip_identity_provisioning: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Auto,
            chunk_size: 0,
            max_concurrency: 0,
            max_sync_records: 0,
            continue_on_error: true,
            validate_only: false,
            skip_duplicate_detection: false,
            skip_role_assignment: false,
            skip_identity_provisioning: false,
        }
    }
}

impl ProcessingOptions {
    /// Fill unset sizes from configuration.
    pub fn with_defaults(mut self, config: &BulkConfig) -> Self {
        if self.chunk_size == 0 {
            self.chunk_size = config.chunk_size;
        }
        if self.max_concurrency == 0 {
            self.max_concurrency = config.max_concurrency;
        }
        if self.max_sync_records == 0 {
            self.max_sync_records = config.max_sync_records;
        }
        self
    }

    /// Inline when sync is requested or the batch is small enough.
    pub fn execution_path(&self, record_count: usize) -> ExecutionPath {
        if self.mode == ProcessingMode::Sync || record_count <= self.max_sync_records {
            ExecutionPath::Inline
        } else {
            ExecutionPath::Chunked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_defaults_fills_only_unset_values() {
        let options = ProcessingOptions {
            chunk_size: 25,
            ..Default::default()
        }
        .with_defaults(&BulkConfig::default());

        assert_eq!(options.chunk_size, 25);
        assert_eq!(options.max_concurrency, 10);
        assert_eq!(options.max_sync_records, 100);
        assert!(options.continue_on_error);
    }

    #[test]
    fn test_execution_path_selection() {
        let options = ProcessingOptions::default().with_defaults(&BulkConfig::default());
        assert_eq!(options.execution_path(100), ExecutionPath::Inline);
        assert_eq!(options.execution_path(101), ExecutionPath::Chunked);

        let sync = ProcessingOptions {
            mode: ProcessingMode::Sync,
            ..options
        };
        assert_eq!(sync.execution_path(5_000), ExecutionPath::Inline);
    }

    #[test]
    fn test_options_deserialize_with_missing_fields() {
        let options: ProcessingOptions =
            serde_json::from_str(r#"{"mode": "sync", "continue_on_error": false}"#).unwrap();
        assert_eq!(options.mode, ProcessingMode::Sync);
        assert!(!options.continue_on_error);
        assert_eq!(options.chunk_size, 0);
    }
}
