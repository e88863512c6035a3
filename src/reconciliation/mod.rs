//! # Reconciliation
//!
//! Periodic drift detection and self-healing against the identity
//! authority: orphan cleanup, pending role-assignment healing and pending
//! secondary-link acknowledgement.

pub mod job;
pub mod report;
pub mod sweeps;

pub use job::ReconciliationJob;
pub use report::{PendingCounts, ReconciliationReport};
pub use sweeps::Sweeper;
