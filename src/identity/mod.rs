//! # Identity Authority Contract
//!
//! Remote service that owns user identities, organizations and role
//! assignments. Implementations must keep a definitive "not found" distinct
//! from transient failures: reconciliation deletes local data only on the
//! former.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryIdentityAuthority;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The authority answered definitively that the resource does not exist.
    #[error("Identity resource not found: {resource} {id}")]
    NotFound { resource: &'static str, id: String },

    /// Network failure, timeout or 5xx. Safe to retry.
    #[error("Identity authority unavailable during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Permission denied: {0}")]
    Permission(String),

    /// Request was understood and refused (bad input, conflict).
    #[error("Identity authority rejected request: {0}")]
    Rejected(String),
}

impl IdentityError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    pub phone: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOrganization {
    pub id: String,
    pub name: String,
}

/// Request to provision (or look up) an identity for a registered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentityUser {
    pub phone: String,
    pub name: String,
    pub email: Option<String>,
    pub organization_id: String,
}

/// Stateless from the caller's perspective; shared by all chunk workers.
#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    /// `Ok(false)` is a definitive "does not exist"; errors are indeterminate.
    async fn user_exists(&self, user_id: &str) -> IdentityResult<bool>;

    async fn get_user(&self, user_id: &str) -> IdentityResult<IdentityUser>;

    async fn get_organization(&self, org_id: &str) -> IdentityResult<IdentityOrganization>;

    /// Returns the existing identity for the phone number or creates one.
    async fn create_or_get_user(&self, request: &NewIdentityUser) -> IdentityResult<IdentityUser>;

    async fn check_role(&self, user_id: &str, role: &str) -> IdentityResult<bool>;

    async fn assign_role(&self, user_id: &str, org_id: &str, role: &str) -> IdentityResult<()>;

    async fn health_check(&self) -> IdentityResult<()>;
}
