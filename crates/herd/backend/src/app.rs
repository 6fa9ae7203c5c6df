//! Rancher Apps backend
//!
//! Installs each chart item as a Helm app on every target individually.

use crate::backend::{DeployContext, DeploymentBackend, FanOut};
use crate::error::{ApiError, BackendError, Result};
use crate::poll::{poll_until, Probe};
use crate::rancher::{App, AppChart, AppSpec, RancherApi};
use async_trait::async_trait;
use herd_types::{format_timeout, ChartRef, DeploymentRecord, RecordStatus, TargetId, WorkItem};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Deploys chart items as Rancher Apps, one per target
pub struct AppBackend {
    api: Arc<dyn RancherApi>,
    poll_interval: Duration,
}

impl AppBackend {
    /// Create a backend polling every 5 seconds
    pub fn new(api: Arc<dyn RancherApi>) -> Self {
        Self {
            api,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Set the readiness poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn chart<'a>(item: &'a WorkItem) -> Result<&'a ChartRef> {
        item.chart_ref().ok_or_else(|| BackendError::Unsupported {
            item: item.name.clone(),
            reason: "not a chart".to_string(),
        })
    }

    fn build_app(item: &WorkItem, chart: &ChartRef, values: Map<String, Value>) -> App {
        App {
            name: chart.release_name.clone(),
            namespace: chart.namespace.clone(),
            spec: AppSpec {
                chart: AppChart {
                    chart_name: chart.chart.clone(),
                    version: chart.version.clone(),
                    repo: (!chart.repo.is_empty()).then(|| chart.repo.clone()),
                    values,
                },
                create_namespace: chart.create_namespace,
                wait: item.wait,
                timeout: format_timeout(item.timeout),
            },
            status: None,
        }
    }

    /// Namespace creation is left to the app's own create path
    async fn ensure_namespace(&self, target: &TargetId, namespace: &str) -> Result<()> {
        info!(target = %target, namespace = %namespace, "Namespace creation delegated to Rancher");
        Ok(())
    }

    async fn apply_one(
        &self,
        item: &WorkItem,
        target: &TargetId,
        values: Map<String, Value>,
    ) -> Result<()> {
        let chart = Self::chart(item)?;
        if chart.create_namespace {
            self.ensure_namespace(target, &chart.namespace).await?;
        }

        let app = Self::build_app(item, chart, values);
        let existing = self
            .api
            .get_app(target.as_str(), &app.namespace, &app.name)
            .await?;

        if existing.is_some() {
            info!(app = %app.name, target = %target, "Updating existing app");
            self.api.update_app(target.as_str(), &app).await?;
        } else {
            info!(app = %app.name, target = %target, "Creating app");
            self.api.create_app(target.as_str(), &app).await?;
        }
        Ok(())
    }

    fn probe(app: Option<App>) -> Probe {
        let Some(status) = app.and_then(|a| a.status) else {
            return Probe::Pending;
        };
        match status.state.as_str() {
            "deployed" => Probe::Ready,
            "failed" | "error" => Probe::Failed(
                status
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            _ => Probe::Pending,
        }
    }
}

#[async_trait]
impl DeploymentBackend for AppBackend {
    fn name(&self) -> &str {
        "rancher-app"
    }

    fn fan_out(&self) -> FanOut {
        FanOut::PerTarget
    }

    #[instrument(skip(self, ctx, item, values), fields(unit = %ctx.unit_name, item = %item.name))]
    async fn create_or_update(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        values: Map<String, Value>,
    ) -> DeploymentRecord {
        let target_id = TargetId::joined(targets);
        if targets.is_empty() {
            return DeploymentRecord::failed(
                item,
                target_id,
                &ctx.unit_namespace,
                BackendError::NoTargets.to_string(),
            );
        }

        let mut failures = Vec::new();
        for target in targets {
            if let Err(e) = self.apply_one(item, target, values.clone()).await {
                warn!(target = %target, error = %e, "Failed to deploy app");
                failures.push(format!("{target}: {e}"));
            }
        }

        if failures.is_empty() {
            DeploymentRecord::new(
                item,
                target_id,
                &ctx.unit_namespace,
                RecordStatus::Deploying,
                "App created/updated successfully",
            )
        } else {
            DeploymentRecord::failed(item, target_id, &ctx.unit_namespace, failures.join("; "))
        }
    }

    async fn wait_until_ready(
        &self,
        _ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let Ok(chart) = Self::chart(item) else {
            return false;
        };
        let deadline = Instant::now() + timeout;
        let api = &self.api;
        let (namespace, name) = (chart.namespace.as_str(), chart.release_name.as_str());

        for target in targets {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let cluster = target.as_str();
            let ready = poll_until(name, self.poll_interval, remaining, cancel, move || async move {
                let app = api.get_app(cluster, namespace, name).await?;
                Ok::<_, ApiError>(Self::probe(app))
            })
            .await;
            if !ready {
                return false;
            }
        }
        true
    }

    async fn delete(
        &self,
        _ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
    ) -> Result<()> {
        let chart = Self::chart(item)?;
        let mut failed = 0;

        for target in targets {
            match self
                .api
                .delete_app(target.as_str(), &chart.namespace, &chart.release_name)
                .await
            {
                Ok(()) => info!(app = %chart.release_name, target = %target, "Deleted app"),
                Err(e) if e.is_not_found() => {
                    info!(app = %chart.release_name, target = %target, "App already absent")
                }
                Err(e) => {
                    warn!(app = %chart.release_name, target = %target, error = %e, "Failed to delete app");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(BackendError::PartialDelete {
                failed,
                total: targets.len(),
            });
        }
        Ok(())
    }
}
