//! The deployment backend capability

use crate::error::Result;
use async_trait::async_trait;
use herd_types::{DeploymentRecord, DeploymentUnit, StepType, TargetId, UnitKind, WorkItem};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a backend spreads one item over several targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// One call covers every target; values are merged once
    Grouped,
    /// One call, and one merge, per target
    PerTarget,
}

/// Unit-level facts a backend needs to name and label its resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployContext {
    pub unit_name: String,
    pub unit_namespace: String,
    pub env: String,
    pub kind: UnitKind,

    /// Set while a pipeline step is being deployed
    pub step_type: Option<StepType>,

    pub security: bool,
    pub observability: bool,
}

impl DeployContext {
    /// Context for every item of `unit`
    pub fn for_unit(unit: &DeploymentUnit) -> Self {
        Self {
            unit_name: unit.name.clone(),
            unit_namespace: unit.namespace.clone(),
            env: unit.env.clone(),
            kind: unit.kind,
            step_type: None,
            security: unit.security,
            observability: unit.observability,
        }
    }

    /// Copy of this context tagged with a step type
    pub fn with_step_type(&self, step_type: StepType) -> Self {
        Self {
            step_type: Some(step_type),
            ..self.clone()
        }
    }
}

/// Idempotent deployment of one work item onto one or more targets.
///
/// Implementations are called by one reconciliation pass at a time per unit,
/// but may be shared across units.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    fn fan_out(&self) -> FanOut;

    /// Create the deployment, or update it in place if it already exists.
    ///
    /// Never fails: errors become a `Failed` record carrying the error text.
    /// A successful call returns a `Deploying` record.
    async fn create_or_update(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        values: Map<String, Value>,
    ) -> DeploymentRecord;

    /// Poll until the deployment is ready.
    ///
    /// Returns false on timeout, on a terminal failure condition, on an
    /// unrecoverable API error, or when `cancel` fires.
    async fn wait_until_ready(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool;

    /// Remove the deployment. A deployment that does not exist is not an
    /// error.
    async fn delete(&self, ctx: &DeployContext, item: &WorkItem, targets: &[TargetId])
        -> Result<()>;
}
