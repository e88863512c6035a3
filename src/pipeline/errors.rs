use thiserror::Error;

use crate::constants::error_codes;
use crate::identity::IdentityError;
use crate::store::StoreError;

/// Failure raised by a single pipeline stage
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Store failure: {0}")]
    Store(String),

    #[error("Record processing cancelled")]
    Cancelled,
}

impl StageError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Code persisted to `ProcessingDetail.error_code`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => error_codes::VALIDATION_ERROR,
            Self::Duplicate(_) => error_codes::DUPLICATE_RECORD,
            Self::Permission(_) => error_codes::PERMISSION_DENIED,
            Self::NotFound(_) => error_codes::NOT_FOUND,
            Self::Transient(_) => error_codes::TRANSIENT_ERROR,
            Self::Store(_) => error_codes::STORE_ERROR,
            Self::Cancelled => error_codes::CANCELLED,
        }
    }
}

impl From<IdentityError> for StageError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotFound { .. } => Self::NotFound(err.to_string()),
            IdentityError::Transient { .. } => Self::Transient(err.to_string()),
            IdentityError::Permission(msg) => Self::Permission(msg),
            IdentityError::Rejected(msg) => Self::validation("identity", msg),
        }
    }
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { .. } => Self::Duplicate(err.to_string()),
            other => Self::Store(other.to_string()),
        }
    }
}

/// A stage failure annotated with the stage that raised it
#[derive(Debug, Clone, Error)]
#[error("stage '{stage}' failed: {source}")]
pub struct PipelineError {
    pub stage: String,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn error_code(&self) -> &'static str {
        self.source.error_code()
    }
}
