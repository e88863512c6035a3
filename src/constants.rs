//! # Engine Constants
//!
//! Fixed defaults and well-known metadata keys shared by the orchestration
//! and reconciliation layers.

/// Processing defaults applied when options leave a value unset (zero).
pub mod defaults {
    use std::time::Duration;

    pub const CHUNK_SIZE: usize = 100;
    pub const MAX_CONCURRENCY: usize = 10;
    pub const MAX_SYNC_RECORDS: usize = 100;

    /// Inline path flushes aggregate progress after this many records.
    pub const INLINE_FLUSH_EVERY: usize = 10;

    /// Chunked path flush cadence for the progress aggregator.
    pub const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

    /// Capacity of the bounded outcome channel feeding the aggregator.
    pub const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

    /// Batches at or below this size get a short grace period on submit.
    pub const SMALL_BATCH_THRESHOLD: usize = 10;
    pub const SMALL_BATCH_GRACE: Duration = Duration::from_millis(200);

    pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(15 * 60);
    pub const RECONCILE_BATCH_SIZE: usize = 100;
    pub const ROLE_VERIFICATION_ATTEMPTS: u32 = 3;
    pub const ROLE_VERIFICATION_DELAY: Duration = Duration::from_millis(500);

    pub const API_BASE_PATH: &str = "/api/v1/bulk";
    pub const DEFAULT_ROLE: &str = "farmer";
}

/// Keys used inside the free-form metadata maps.
pub mod metadata_keys {
    pub const RETRY_OF: &str = "retry_of";
    pub const RETRY_RECORD_COUNT: &str = "retry_record_count";
    pub const ORIGINAL_INDEX: &str = "original_index";
    pub const ORIGINAL_DETAIL_ID: &str = "original_detail_id";
    pub const PROCESSING_MODE: &str = "processing_mode";
    pub const PROCESSING_OPTIONS: &str = "processing_options";
    pub const CANCELLED_AT: &str = "cancelled_at";

    pub const ROLE_ASSIGNMENT_PENDING: &str = "role_assignment_pending";
    pub const ROLE_ASSIGNMENT_FIXED_AT: &str = "role_assignment_fixed_at";
    pub const SECONDARY_LINK_PENDING: &str = "secondary_link_pending";
    pub const SECONDARY_LINK_ACKNOWLEDGED_AT: &str = "secondary_link_acknowledged_at";
}

/// Error codes written to `ProcessingDetail.error_code`.
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const DUPLICATE_RECORD: &str = "DUPLICATE_RECORD";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const TRANSIENT_ERROR: &str = "TRANSIENT_ERROR";
    pub const IDENTITY_UNAVAILABLE: &str = "IDENTITY_UNAVAILABLE";
    pub const STORE_ERROR: &str = "STORE_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CANCELLED: &str = "CANCELLED";
}
