pub mod bulk_operation;
pub mod entity;
pub mod processing_detail;

// Re-export core models for easy access
pub use bulk_operation::{BulkOperation, InputFormat, NewBulkOperation};
pub use entity::{DependentRecord, RegisteredEntity};
pub use processing_detail::{DetailOutcome, ProcessingDetail};
