//! # Engine Configuration
//!
//! YAML-backed configuration for the bulk engine and the reconciliation job.
//! Every field has a default, so a missing file yields a working setup;
//! environment sections and variables override it (see [`ConfigManager`]).
//!
//! ```yaml
//! bulk:
//!   chunk_size: 100
//!   max_concurrency: 10
//! reconciliation:
//!   interval_seconds: 900
//! production:
//!   bulk:
//!     max_concurrency: 25
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;

/// Root configuration structure mirroring bulk-engine.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bulk: BulkConfig,
    pub reconciliation: ReconciliationConfig,
}

/// Bulk operation processing configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BulkConfig {
    pub chunk_size: usize,
    pub max_concurrency: usize,
    /// Batches at or below this size take the inline path
    pub max_sync_records: usize,
    pub inline_flush_every: usize,
    pub progress_flush_interval_ms: u64,
    pub progress_channel_capacity: usize,
    pub small_batch_threshold: usize,
    pub small_batch_grace_ms: u64,
    pub api_base_path: String,
    pub role: String,
    pub role_verification_attempts: u32,
    pub role_verification_delay_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            max_concurrency: defaults::MAX_CONCURRENCY,
            max_sync_records: defaults::MAX_SYNC_RECORDS,
            inline_flush_every: defaults::INLINE_FLUSH_EVERY,
            progress_flush_interval_ms: defaults::PROGRESS_FLUSH_INTERVAL.as_millis() as u64,
            progress_channel_capacity: defaults::PROGRESS_CHANNEL_CAPACITY,
            small_batch_threshold: defaults::SMALL_BATCH_THRESHOLD,
            small_batch_grace_ms: defaults::SMALL_BATCH_GRACE.as_millis() as u64,
            api_base_path: defaults::API_BASE_PATH.to_string(),
            role: defaults::DEFAULT_ROLE.to_string(),
            role_verification_attempts: defaults::ROLE_VERIFICATION_ATTEMPTS,
            role_verification_delay_ms: defaults::ROLE_VERIFICATION_DELAY.as_millis() as u64,
        }
    }
}

impl BulkConfig {
    pub fn progress_flush_interval(&self) -> Duration {
        Duration::from_millis(self.progress_flush_interval_ms.max(1))
    }

    pub fn small_batch_grace(&self) -> Duration {
        Duration::from_millis(self.small_batch_grace_ms)
    }

    pub fn role_verification_delay(&self) -> Duration {
        Duration::from_millis(self.role_verification_delay_ms)
    }
}

/// Reconciliation job configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Upper bound on rows scanned per sweep per pass
    pub batch_size: usize,
    pub verification_attempts: u32,
    pub verification_delay_ms: u64,
    pub role: String,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: defaults::RECONCILE_INTERVAL.as_secs(),
            batch_size: defaults::RECONCILE_BATCH_SIZE,
            verification_attempts: defaults::ROLE_VERIFICATION_ATTEMPTS,
            verification_delay_ms: defaults::ROLE_VERIFICATION_DELAY.as_millis() as u64,
            role: defaults::DEFAULT_ROLE.to_string(),
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn verification_delay(&self) -> Duration {
        Duration::from_millis(self.verification_delay_ms)
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("bulk.chunk_size", self.bulk.chunk_size),
            ("bulk.max_concurrency", self.bulk.max_concurrency),
            ("bulk.inline_flush_every", self.bulk.inline_flush_every),
            (
                "bulk.progress_channel_capacity",
                self.bulk.progress_channel_capacity,
            ),
            ("reconciliation.batch_size", self.reconciliation.batch_size),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be greater than 0",
                ));
            }
        }

        if self.bulk.progress_flush_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "bulk.progress_flush_interval_ms",
                "0",
                "flush interval must be greater than 0",
            ));
        }

        if self.reconciliation.enabled && self.reconciliation.interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.interval_seconds",
                "0",
                "interval must be greater than 0 when reconciliation is enabled",
            ));
        }

        if self.bulk.role.trim().is_empty() || self.reconciliation.role.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "role",
                "",
                "role name must not be empty",
            ));
        }

        Ok(())
    }
}
