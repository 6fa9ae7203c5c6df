//! Pipeline step backend
//!
//! Each [`StepType`] has its own [`StepHandler`]. The backend only routes;
//! handlers decide how a step turns into cluster resources.

use crate::backend::{DeployContext, DeploymentBackend, FanOut};
use crate::error::{BackendError, Result};
use async_trait::async_trait;
use herd_types::{ChartRef, DeploymentRecord, StepType, TargetId, WorkItem};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Executes one kind of pipeline step
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn step_type(&self) -> StepType;

    async fn execute(
        &self,
        ctx: &DeployContext,
        step: &WorkItem,
        targets: &[TargetId],
        values: Map<String, Value>,
    ) -> DeploymentRecord;

    async fn wait_until_ready(
        &self,
        ctx: &DeployContext,
        step: &WorkItem,
        targets: &[TargetId],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool;

    async fn delete(&self, ctx: &DeployContext, step: &WorkItem, targets: &[TargetId])
        -> Result<()>;
}

/// Routes pipeline steps to the handler registered for their type
#[derive(Default)]
pub struct StepBackend {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl StepBackend {
    /// Create a backend with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chart-deploying handler for every step type
    pub fn with_chart_handlers(inner: Arc<dyn DeploymentBackend>) -> Self {
        let mut backend = Self::new();
        for step_type in StepType::ALL {
            backend.register(Arc::new(ChartStepHandler::new(step_type, inner.clone())));
        }
        backend
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.step_type(), handler);
    }

    fn handler(&self, step: &WorkItem) -> Result<&Arc<dyn StepHandler>> {
        let step_type = step.step_type().ok_or_else(|| BackendError::Unsupported {
            item: step.name.clone(),
            reason: "not a pipeline step".to_string(),
        })?;
        self.handlers
            .get(&step_type)
            .ok_or(BackendError::NoHandler(step_type))
    }
}

#[async_trait]
impl DeploymentBackend for StepBackend {
    fn name(&self) -> &str {
        "pipeline-step"
    }

    fn fan_out(&self) -> FanOut {
        FanOut::Grouped
    }

    async fn create_or_update(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        values: Map<String, Value>,
    ) -> DeploymentRecord {
        match self.handler(item) {
            Ok(handler) => {
                let ctx = ctx.with_step_type(handler.step_type());
                let mut record = handler.execute(&ctx, item, targets, values).await;
                record.step_type = item.step_type();
                record
            }
            Err(e) => {
                warn!(step = %item.name, error = %e, "Cannot execute step");
                DeploymentRecord::failed(
                    item,
                    TargetId::joined(targets),
                    &ctx.unit_namespace,
                    format!("Step execution failed: {e}"),
                )
            }
        }
    }

    async fn wait_until_ready(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        match self.handler(item) {
            Ok(handler) => {
                let ctx = ctx.with_step_type(handler.step_type());
                handler
                    .wait_until_ready(&ctx, item, targets, timeout, cancel)
                    .await
            }
            Err(_) => false,
        }
    }

    async fn delete(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
    ) -> Result<()> {
        let handler = self.handler(item)?;
        let ctx = ctx.with_step_type(handler.step_type());
        handler.delete(&ctx, item, targets).await
    }
}

/// `config.chart` section of a step
#[derive(Debug, Deserialize)]
struct StepChart {
    name: String,
    repo: String,
    version: String,
    #[serde(default)]
    namespace: Option<String>,
}

/// Deploys a step as a Helm chart through an inner backend.
///
/// Chart coordinates come from the step's `chart` config key; every other
/// merged value is handed to the chart. The release is named after the step.
pub struct ChartStepHandler {
    step_type: StepType,
    inner: Arc<dyn DeploymentBackend>,
}

impl ChartStepHandler {
    /// Create a handler for one step type
    pub fn new(step_type: StepType, inner: Arc<dyn DeploymentBackend>) -> Self {
        Self { step_type, inner }
    }

    /// The chart item this step deploys as
    fn chart_item(step: &WorkItem, unit_namespace: &str) -> Result<WorkItem> {
        let section = step
            .values
            .inline
            .get("chart")
            .cloned()
            .ok_or_else(|| BackendError::Unsupported {
                item: step.name.clone(),
                reason: "step config has no chart section".to_string(),
            })?;
        let chart: StepChart =
            serde_json::from_value(section).map_err(|e| BackendError::Unsupported {
                item: step.name.clone(),
                reason: format!("invalid chart section: {e}"),
            })?;

        let namespace = chart
            .namespace
            .unwrap_or_else(|| unit_namespace.to_string());
        let mut item = WorkItem::chart(
            step.name.clone(),
            ChartRef::new(chart.name, chart.repo, chart.version, namespace)
                .with_release_name(step.name.clone()),
        )
        .with_timeout(step.timeout)
        .depends_on(step.depends_on.clone());
        item.wait = step.wait;
        Ok(item)
    }
}

#[async_trait]
impl StepHandler for ChartStepHandler {
    fn step_type(&self) -> StepType {
        self.step_type
    }

    async fn execute(
        &self,
        ctx: &DeployContext,
        step: &WorkItem,
        targets: &[TargetId],
        mut values: Map<String, Value>,
    ) -> DeploymentRecord {
        let item = match Self::chart_item(step, &ctx.unit_namespace) {
            Ok(item) => item,
            Err(e) => {
                return DeploymentRecord::failed(
                    step,
                    TargetId::joined(targets),
                    &ctx.unit_namespace,
                    format!("Step execution failed: {e}"),
                )
            }
        };

        values.remove("chart");
        debug!(step = %step.name, step_type = %self.step_type, backend = self.inner.name(), "Deploying step chart");
        self.inner.create_or_update(ctx, &item, targets, values).await
    }

    async fn wait_until_ready(
        &self,
        ctx: &DeployContext,
        step: &WorkItem,
        targets: &[TargetId],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        match Self::chart_item(step, &ctx.unit_namespace) {
            Ok(item) => {
                self.inner
                    .wait_until_ready(ctx, &item, targets, timeout, cancel)
                    .await
            }
            Err(_) => false,
        }
    }

    async fn delete(
        &self,
        ctx: &DeployContext,
        step: &WorkItem,
        targets: &[TargetId],
    ) -> Result<()> {
        let item = Self::chart_item(step, &ctx.unit_namespace)?;
        self.inner.delete(ctx, &item, targets).await
    }
}
