//! # Engine Error Types
//!
//! Crate-level error enum returned by the public orchestration, retry and
//! reconciliation entry points. Layer-specific errors (store, identity,
//! pipeline, state machine, configuration) convert into it with `?`.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::identity::IdentityError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Submission carried no records.
    #[error("Input error: no records supplied for bulk operation")]
    EmptyInput,

    #[error("Input error: unsupported input format '{0}'")]
    UnsupportedFormat(String),

    #[error("Bulk operation not found: {0}")]
    OperationNotFound(Uuid),

    #[error("Bulk operation {operation_id} is not retryable: {reason}")]
    NotRetryable { operation_id: Uuid, reason: String },

    #[error("Bulk operation {0} has no retryable failed records")]
    NoRetryableRecords(Uuid),

    #[error("Bulk operation {operation_id} cannot be cancelled in status '{status}'")]
    NotCancellable { operation_id: Uuid, status: String },

    #[error("A reconciliation pass is already in progress")]
    ReconciliationInProgress,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Identity authority error: {0}")]
    Identity(#[from] IdentityError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl EngineError {
    /// Input errors are rejected before any operation exists and are never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::UnsupportedFormat(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_classification() {
        assert!(EngineError::EmptyInput.is_input_error());
        assert!(EngineError::UnsupportedFormat("xml".to_string()).is_input_error());
        assert!(!EngineError::ReconciliationInProgress.is_input_error());
    }

    #[test]
    fn test_display_messages() {
        let id = Uuid::nil();
        let err = EngineError::NotCancellable {
            operation_id: id,
            status: "completed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            format!("Bulk operation {id} cannot be cancelled in status 'completed'")
        );
    }
}
