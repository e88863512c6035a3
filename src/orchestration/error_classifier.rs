//! # Record Error Classification
//!
//! Maps the error code stored on a failed `ProcessingDetail` to a category.
//! Only transient infrastructure failures are eligible for the retry
//! subsystem; validation, duplicate and permission failures would fail the
//! same way again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::error_codes;

/// Primary error categories for failed records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input - never retried
    Validation,

    /// Record already exists
    Duplicate,

    /// Caller lacks access
    Permission,

    /// Referenced resource does not exist
    NotFound,

    /// Network, timeout or store hiccup - may succeed on retry
    Transient,

    /// Processing was interrupted by cancellation
    Cancelled,

    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Duplicate => write!(f, "Duplicate"),
            ErrorCategory::Permission => write!(f, "Permission"),
            ErrorCategory::NotFound => write!(f, "Not Found"),
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Cancelled => write!(f, "Cancelled"),
            ErrorCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(code: Option<&str>) -> ErrorCategory {
        match code {
            Some(error_codes::VALIDATION_ERROR) => ErrorCategory::Validation,
            Some(error_codes::DUPLICATE_RECORD) => ErrorCategory::Duplicate,
            Some(error_codes::PERMISSION_DENIED) => ErrorCategory::Permission,
            Some(error_codes::NOT_FOUND) => ErrorCategory::NotFound,
            Some(
                error_codes::TRANSIENT_ERROR
                | error_codes::IDENTITY_UNAVAILABLE
                | error_codes::STORE_ERROR
                | error_codes::TIMEOUT,
            ) => ErrorCategory::Transient,
            Some(error_codes::CANCELLED) => ErrorCategory::Cancelled,
            _ => ErrorCategory::Unknown,
        }
    }

    pub fn is_retryable(code: Option<&str>) -> bool {
        Self::classify(code).is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_codes_are_retryable() {
        for code in [
            error_codes::TRANSIENT_ERROR,
            error_codes::IDENTITY_UNAVAILABLE,
            error_codes::STORE_ERROR,
            error_codes::TIMEOUT,
        ] {
            assert!(ErrorClassifier::is_retryable(Some(code)), "{code}");
        }

        for code in [
            error_codes::VALIDATION_ERROR,
            error_codes::DUPLICATE_RECORD,
            error_codes::PERMISSION_DENIED,
            error_codes::NOT_FOUND,
            error_codes::CANCELLED,
        ] {
            assert!(!ErrorClassifier::is_retryable(Some(code)), "{code}");
        }
    }

    #[test]
    fn test_missing_or_unknown_code() {
        assert_eq!(ErrorClassifier::classify(None), ErrorCategory::Unknown);
        assert_eq!(
            ErrorClassifier::classify(Some("SOMETHING_ELSE")),
            ErrorCategory::Unknown
        );
        assert!(!ErrorClassifier::is_retryable(None));
    }
}
