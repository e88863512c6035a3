//! # Processing Pipeline
//!
//! An ordered list of named stages applied to one record. Stages share a
//! [`ProcessingContext`]; the first failing stage stops the run and its error
//! is returned to the caller with the stage name attached. There are no
//! retries inside a single run.
//!
//! Stage selection is a pure function of [`ProcessingOptions`]: the
//! orchestrator computes a [`StageKind`] plan once per operation and builds
//! the pipeline from it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bulk_engine::identity::InMemoryIdentityAuthority;
//! use bulk_engine::orchestration::ProcessingOptions;
//! use bulk_engine::pipeline::{PipelineBuilder, PipelineDependencies, ProcessingContext};
//! use bulk_engine::store::InMemoryEntityStore;
//!
//! # async fn example() {
//! let deps = PipelineDependencies::new(
//!     Arc::new(InMemoryEntityStore::new()),
//!     Arc::new(InMemoryIdentityAuthority::new()),
//! );
//! let pipeline = PipelineBuilder::from_options(&ProcessingOptions::default(), &deps).build();
//! let mut ctx = ProcessingContext::new(
//!     uuid::Uuid::new_v4(),
//!     "org-1",
//!     "admin",
//!     0,
//!     serde_json::json!({"name": "Asha", "phone": "9876543210"}),
//! );
//! pipeline.execute(&mut ctx).await.unwrap();
//! # }
//! ```

pub mod context;
pub mod errors;
pub mod stages;
pub mod validation;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use context::ProcessingContext;
pub use errors::{PipelineError, StageError};
pub use validation::{validate_record, NormalizedRecord, RecordFieldError};

use crate::constants::defaults;
use crate::identity::IdentityAuthority;
use crate::orchestration::ProcessingOptions;
use crate::store::EntityStore;
use stages::{
    DuplicateCheckStage, EntityPersistStage, IdentityProvisioningStage, RoleAssignmentStage,
    ValidationStage,
};

/// Capability shared by every stage
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Do the stage's work. A returned value is published under `name()`.
    async fn run(&self, ctx: &mut ProcessingContext) -> Result<Option<Value>, StageError>;
}

/// Built-in stage kinds, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Validate,
    DuplicateCheck,
    IdentityProvisioning,
    RoleAssignment,
    EntityPersist,
}

impl StageKind {
    /// Stage plan for a submission. Pure; fixed for the lifetime of an operation.
    pub fn plan(options: &ProcessingOptions) -> Vec<StageKind> {
        let mut plan = vec![StageKind::Validate];
        if !options.skip_duplicate_detection {
            plan.push(StageKind::DuplicateCheck);
        }
        if !options.skip_identity_provisioning {
            plan.push(StageKind::IdentityProvisioning);
            if !options.skip_role_assignment {
                plan.push(StageKind::RoleAssignment);
            }
        }
        plan.push(StageKind::EntityPersist);
        plan
    }
}

/// Collaborators the stock stages need
#[derive(Clone)]
pub struct PipelineDependencies {
    pub entities: Arc<dyn EntityStore>,
    pub identity: Arc<dyn IdentityAuthority>,
    pub role: String,
    pub verification_attempts: u32,
    pub verification_delay: Duration,
}

impl PipelineDependencies {
    pub fn new(entities: Arc<dyn EntityStore>, identity: Arc<dyn IdentityAuthority>) -> Self {
        Self {
            entities,
            identity,
            role: defaults::DEFAULT_ROLE.to_string(),
            verification_attempts: defaults::ROLE_VERIFICATION_ATTEMPTS,
            verification_delay: defaults::ROLE_VERIFICATION_DELAY,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_verification(mut self, attempts: u32, delay: Duration) -> Self {
        self.verification_attempts = attempts;
        self.verification_delay = delay;
        self
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the stock stages for `options`.
    pub fn from_options(options: &ProcessingOptions, deps: &PipelineDependencies) -> Self {
        let plan = StageKind::plan(options);
        let role_pending = !plan.contains(&StageKind::RoleAssignment);

        let mut builder = Self::new();
        for kind in plan {
            let stage: Arc<dyn PipelineStage> = match kind {
                StageKind::Validate => Arc::new(ValidationStage),
                StageKind::DuplicateCheck => {
                    Arc::new(DuplicateCheckStage::new(deps.entities.clone()))
                }
                StageKind::IdentityProvisioning => {
                    Arc::new(IdentityProvisioningStage::new(deps.identity.clone()))
                }
                StageKind::RoleAssignment => Arc::new(RoleAssignmentStage::new(
                    deps.identity.clone(),
                    deps.role.clone(),
                    deps.verification_attempts,
                    deps.verification_delay,
                )),
                StageKind::EntityPersist => {
                    Arc::new(EntityPersistStage::new(deps.entities.clone(), role_pending))
                }
            };
            builder = builder.with_stage(stage);
        }
        builder
    }

    pub fn with_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// Ordered stage list; cheap to clone and share across chunk workers
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, stopping at the first failure.
    pub async fn execute(&self, ctx: &mut ProcessingContext) -> Result<(), PipelineError> {
        for stage in &self.stages {
            let name = stage.name();
            match stage.run(ctx).await {
                Ok(Some(result)) => ctx.publish(name, result),
                Ok(None) => {}
                Err(source) => {
                    debug!(
                        operation_id = %ctx.operation_id,
                        record_index = ctx.record_index,
                        stage = name,
                        error = %source,
                        "Pipeline stage failed"
                    );
                    return Err(PipelineError {
                        stage: name.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}
