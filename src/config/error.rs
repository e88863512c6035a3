//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read configuration file {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("Invalid YAML in {path}: {message}")]
    InvalidYaml { path: String, message: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration file not found; searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

impl ConfigurationError {
    pub fn file_read_error(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid_yaml(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::InvalidYaml {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
