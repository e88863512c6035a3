//! # Registration Stages
//!
//! Stock stages for the farmer registration pipeline. Each stage reads what
//! earlier stages published in the [`ProcessingContext`] and publishes its
//! own result under its name.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::context::ProcessingContext;
use super::errors::StageError;
use super::validation::{validate_record, NormalizedRecord};
use super::PipelineStage;
use crate::constants::metadata_keys;
use crate::identity::{IdentityAuthority, NewIdentityUser};
use crate::models::RegisteredEntity;
use crate::store::EntityStore;

pub const VALIDATE: &str = "validate";
pub const DUPLICATE_CHECK: &str = "duplicate_check";
pub const IDENTITY_PROVISIONING: &str = "identity_provisioning";
pub const ROLE_ASSIGNMENT: &str = "role_assignment";
pub const ENTITY_PERSIST: &str = "entity_persist";

fn normalized(ctx: &ProcessingContext) -> Result<NormalizedRecord, StageError> {
    ctx.stage_result(VALIDATE)
        .and_then(NormalizedRecord::from_value)
        .ok_or_else(|| StageError::validation("record", "validate stage has not run"))
}

/// Field validation and normalization
pub struct ValidationStage;

#[async_trait]
impl PipelineStage for ValidationStage {
    fn name(&self) -> &'static str {
        VALIDATE
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<Option<Value>, StageError> {
        match validate_record(ctx.record_index, &ctx.input) {
            Ok(record) => Ok(Some(record.to_value())),
            Err(errors) => {
                let message = errors
                    .iter()
                    .map(|e| format!("{} {}", e.field, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                let field = errors
                    .first()
                    .map(|e| e.field.clone())
                    .unwrap_or_else(|| "record".to_string());
                Err(StageError::Validation { field, message })
            }
        }
    }
}

/// Rejects a phone number already registered in the organization
pub struct DuplicateCheckStage {
    entities: Arc<dyn EntityStore>,
}

impl DuplicateCheckStage {
    pub fn new(entities: Arc<dyn EntityStore>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl PipelineStage for DuplicateCheckStage {
    fn name(&self) -> &'static str {
        DUPLICATE_CHECK
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<Option<Value>, StageError> {
        let record = normalized(ctx)?;
        if let Some(existing) = self
            .entities
            .find_by_phone(&ctx.organization_id, &record.phone)
            .await?
        {
            return Err(StageError::Duplicate(format!(
                "phone {} already registered as {}",
                record.phone, existing.id
            )));
        }
        Ok(None)
    }
}

/// Creates (or looks up) the external identity for the record
pub struct IdentityProvisioningStage {
    identity: Arc<dyn IdentityAuthority>,
}

impl IdentityProvisioningStage {
    pub fn new(identity: Arc<dyn IdentityAuthority>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl PipelineStage for IdentityProvisioningStage {
    fn name(&self) -> &'static str {
        IDENTITY_PROVISIONING
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<Option<Value>, StageError> {
        let record = normalized(ctx)?;
        let user = self
            .identity
            .create_or_get_user(&NewIdentityUser {
                phone: record.phone,
                name: record.name,
                email: record.email,
                organization_id: ctx.organization_id.clone(),
            })
            .await?;
        Ok(Some(json!({ "identity_id": user.id })))
    }
}

/// Grants the registration role and verifies the grant became visible
pub struct RoleAssignmentStage {
    identity: Arc<dyn IdentityAuthority>,
    role: String,
    verification_attempts: u32,
    verification_delay: Duration,
}

impl RoleAssignmentStage {
    pub fn new(
        identity: Arc<dyn IdentityAuthority>,
        role: impl Into<String>,
        verification_attempts: u32,
        verification_delay: Duration,
    ) -> Self {
        Self {
            identity,
            role: role.into(),
            verification_attempts: verification_attempts.max(1),
            verification_delay,
        }
    }
}

#[async_trait]
impl PipelineStage for RoleAssignmentStage {
    fn name(&self) -> &'static str {
        ROLE_ASSIGNMENT
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<Option<Value>, StageError> {
        let identity_id = ctx
            .stage_field(IDENTITY_PROVISIONING, "identity_id")
            .map(str::to_string)
            .ok_or_else(|| StageError::NotFound("no identity provisioned for record".to_string()))?;

        if !self.identity.check_role(&identity_id, &self.role).await? {
            self.identity
                .assign_role(&identity_id, &ctx.organization_id, &self.role)
                .await?;
        }

        for attempt in 1..=self.verification_attempts {
            if self.identity.check_role(&identity_id, &self.role).await? {
                return Ok(Some(json!({ "role": self.role, "verified_attempt": attempt })));
            }
            debug!(
                identity_id = %identity_id,
                attempt,
                "Role grant not visible yet"
            );
            if attempt < self.verification_attempts {
                tokio::time::sleep(self.verification_delay).await;
            }
        }

        warn!(
            identity_id = %identity_id,
            role = %self.role,
            "Role assignment could not be verified"
        );
        Err(StageError::Transient(format!(
            "role '{}' not verified after {} attempts",
            self.role, self.verification_attempts
        )))
    }
}

/// Persists the local entity, linking the provisioned identity
pub struct EntityPersistStage {
    entities: Arc<dyn EntityStore>,
    /// Role assignment was skipped; flag the entity for reconciliation.
    flag_role_pending: bool,
}

impl EntityPersistStage {
    pub fn new(entities: Arc<dyn EntityStore>, flag_role_pending: bool) -> Self {
        Self {
            entities,
            flag_role_pending,
        }
    }
}

#[async_trait]
impl PipelineStage for EntityPersistStage {
    fn name(&self) -> &'static str {
        ENTITY_PERSIST
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<Option<Value>, StageError> {
        let record = normalized(ctx)?;
        let mut entity = RegisteredEntity::new(&ctx.organization_id, &record.name, &record.phone);
        entity.email = record.email.clone();

        if let Some(identity_id) = ctx.stage_field(IDENTITY_PROVISIONING, "identity_id") {
            entity = entity.with_identity(identity_id);
            if self.flag_role_pending {
                entity = entity.with_flag(metadata_keys::ROLE_ASSIGNMENT_PENDING);
            }
        }
        if let Some(link) = &record.secondary_link_id {
            entity = entity.with_flag(metadata_keys::SECONDARY_LINK_PENDING);
            entity
                .metadata
                .insert("secondary_link_id".to_string(), Value::String(link.clone()));
        }
        entity.metadata.insert(
            "bulk_operation_id".to_string(),
            Value::String(ctx.operation_id.to_string()),
        );

        self.entities.insert_entity(&entity).await?;
        Ok(Some(json!({ "entity_id": entity.id })))
    }
}
