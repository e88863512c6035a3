//! # Structured Logging Module
//!
//! Environment-aware structured logging for the bulk engine. Console output
//! by default, JSON lines when `BULK_LOG_FORMAT=json`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::ConfigManager;
use crate::reconciliation::ReconciliationReport;
use crate::state_machine::OperationStatus;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_output();

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be installed by the host process
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn use_json_output() -> bool {
    std::env::var("BULK_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for bulk operation lifecycle events
pub fn log_operation(
    operation: &str,
    operation_id: Uuid,
    status: OperationStatus,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        operation_id = %operation_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 BULK_OPERATION"
    );
}

/// Log a reconciliation pass summary
pub fn log_reconciliation(report: &ReconciliationReport) {
    tracing::info!(
        duration_ms = report.duration_ms,
        orphans_deleted = report.orphans_deleted,
        roles_processed = report.roles_processed,
        roles_fixed = report.roles_fixed,
        roles_still_pending = report.roles_still_pending,
        links_processed = report.secondary_links_processed,
        links_fixed = report.secondary_links_fixed,
        errors = report.errors.len(),
        "🩺 RECONCILE: Pass complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
