//! Registered entities
//!
//! Local primary records produced by the registration pipeline (one per
//! successfully processed input record) together with the dependent rows
//! they own. Reconciliation scans these against the identity authority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::metadata_keys;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredEntity {
    pub id: String,
    pub organization_id: String,
    /// External identity this record is linked to
    pub identity_id: Option<String>,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegisteredEntity {
    pub fn new(
        organization_id: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            identity_id: None,
            name: name.into(),
            phone: phone.into(),
            email: None,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    pub fn with_flag(mut self, key: &str) -> Self {
        self.metadata.insert(key.to_string(), Value::Bool(true));
        self
    }

    fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn role_assignment_pending(&self) -> bool {
        self.flag(metadata_keys::ROLE_ASSIGNMENT_PENDING)
    }

    pub fn secondary_link_pending(&self) -> bool {
        self.flag(metadata_keys::SECONDARY_LINK_PENDING)
    }
}

/// A row owned by a registered entity (addresses, farms, crop cycles...).
///
/// `depth` orders cascade deletes: deeper rows go first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentRecord {
    pub id: String,
    pub entity_id: String,
    pub kind: String,
    pub depth: u8,
}

impl DependentRecord {
    pub fn new(entity_id: impl Into<String>, kind: impl Into<String>, depth: u8) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            kind: kind.into(),
            depth,
        }
    }
}
