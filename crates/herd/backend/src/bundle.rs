//! Fleet Bundle backend
//!
//! One bundle per (unit, item), fanned out to every target through the
//! bundle's target list. The bundle lives in the workspace that owns the
//! first target.

use crate::backend::{DeployContext, DeploymentBackend, FanOut};
use crate::error::{ApiError, BackendError, Result};
use crate::fleet::{Bundle, BundleSpec, BundleTarget, FleetApi, HelmOptions};
use crate::poll::{poll_until, Probe};
use async_trait::async_trait;
use herd_types::{
    format_timeout, DeploymentRecord, RecordStatus, TargetId, UnitKind, WorkItem,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const LABEL_PREFIX: &str = "herd.suse.com";

/// Fleet workspace layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    /// Workspaces scanned for registrations, clusters and bundles, in order
    pub workspaces: Vec<String>,

    /// Target id of the management cluster
    pub local_cluster: String,

    /// Workspace assumed for `local_cluster` when nothing claims it
    pub local_workspace: String,

    /// Workspace assumed for every other unclaimed target
    pub default_workspace: String,

    pub poll_interval_secs: u64,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            workspaces: vec!["fleet-default".to_string(), "fleet-local".to_string()],
            local_cluster: "local".to_string(),
            local_workspace: "fleet-local".to_string(),
            default_workspace: "fleet-default".to_string(),
            poll_interval_secs: 10,
        }
    }
}

/// Deploys chart items as multi-target Fleet Bundles
pub struct BundleBackend {
    api: Arc<dyn FleetApi>,
    settings: FleetSettings,
}

impl BundleBackend {
    /// Create a backend with default Fleet settings
    pub fn new(api: Arc<dyn FleetApi>) -> Self {
        Self::with_settings(api, FleetSettings::default())
    }

    /// Create a backend with explicit Fleet settings
    pub fn with_settings(api: Arc<dyn FleetApi>, settings: FleetSettings) -> Self {
        Self { api, settings }
    }

    /// Stable bundle name for an item of a unit
    pub fn bundle_name(ctx: &DeployContext, item: &WorkItem) -> String {
        format!("{}-{}", ctx.unit_name, item.name)
    }

    /// Find the workspace whose registrations claim `target`.
    ///
    /// Workspaces that cannot be listed are skipped. Falls back to the local
    /// workspace for the local cluster and the default workspace otherwise.
    pub async fn resolve_workspace(&self, target: &TargetId) -> String {
        for workspace in &self.settings.workspaces {
            match self.api.list_cluster_registrations(workspace).await {
                Ok(registrations) => {
                    let claimed = registrations
                        .iter()
                        .any(|r| r.cluster_name.as_deref() == Some(target.as_str()));
                    if claimed {
                        debug!(target = %target, workspace = %workspace, "Found cluster registration");
                        return workspace.clone();
                    }
                }
                Err(e) => {
                    debug!(workspace = %workspace, error = %e, "Could not list cluster registrations");
                }
            }
        }

        if target.as_str() == self.settings.local_cluster {
            self.settings.local_workspace.clone()
        } else {
            self.settings.default_workspace.clone()
        }
    }

    fn labels(ctx: &DeployContext, item: &WorkItem) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        let mut label = |key: &str, value: String| {
            labels.insert(format!("{LABEL_PREFIX}/{key}"), value);
        };

        match ctx.kind {
            UnitKind::Stack => {
                label("stack", ctx.unit_name.clone());
                label("chart", item.name.clone());
                label("stack-namespace", ctx.unit_namespace.clone());
            }
            UnitKind::Pipeline => {
                label("pipeline", ctx.unit_name.clone());
                label("chart", item.name.clone());
                label("pipeline-namespace", ctx.unit_namespace.clone());
                if let Some(step_type) = ctx.step_type {
                    label("step-type", step_type.as_str().to_string());
                }
                label("security", ctx.security.to_string());
                label("observability", ctx.observability.to_string());
            }
        }
        labels
    }

    fn build_bundle(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        workspace: String,
        targets: &[TargetId],
        values: Map<String, Value>,
    ) -> Result<Bundle> {
        let chart = item.chart_ref().ok_or_else(|| BackendError::Unsupported {
            item: item.name.clone(),
            reason: "not a chart".to_string(),
        })?;

        Ok(Bundle {
            name: Self::bundle_name(ctx, item),
            namespace: workspace,
            labels: Self::labels(ctx, item),
            spec: BundleSpec {
                default_namespace: chart.namespace.clone(),
                helm: HelmOptions {
                    chart: chart.chart.clone(),
                    repo: chart.repo.clone(),
                    version: chart.version.clone(),
                    release_name: chart.release_name.clone(),
                    values,
                    atomic: true,
                    wait: item.wait,
                    timeout: format_timeout(item.timeout),
                    create_namespace: chart.create_namespace,
                },
                targets: targets
                    .iter()
                    .map(|t| BundleTarget {
                        cluster_name: t.as_str().to_string(),
                    })
                    .collect(),
            },
            status: None,
        })
    }

    async fn apply(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        values: Map<String, Value>,
    ) -> Result<String> {
        let first = targets.first().ok_or(BackendError::NoTargets)?;
        let workspace = self.resolve_workspace(first).await;
        let bundle = self.build_bundle(ctx, item, workspace, targets, values)?;

        match self.api.get_bundle(&bundle.namespace, &bundle.name).await {
            Ok(_) => {
                info!(bundle = %bundle.name, workspace = %bundle.namespace, "Updating existing Fleet Bundle");
                self.api.update_bundle(&bundle).await?;
            }
            Err(e) if e.is_not_found() => {
                info!(bundle = %bundle.name, workspace = %bundle.namespace, "Creating Fleet Bundle");
                self.api.create_bundle(&bundle).await?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(bundle.name)
    }

    fn probe(bundle: &Bundle) -> Probe {
        let conditions = bundle
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();

        if conditions.iter().any(|c| c.is("Ready", "True")) {
            return Probe::Ready;
        }

        let failed = conditions.iter().find(|c| {
            (c.is("Ready", "False")
                && matches!(c.reason.as_deref(), Some("Failed") | Some("Error")))
                || c.is("Stalled", "True")
        });
        match failed {
            Some(c) => Probe::Failed(
                c.message
                    .clone()
                    .or_else(|| c.reason.clone())
                    .unwrap_or_else(|| c.condition_type.clone()),
            ),
            None => Probe::Pending,
        }
    }
}

#[async_trait]
impl DeploymentBackend for BundleBackend {
    fn name(&self) -> &str {
        "fleet-bundle"
    }

    fn fan_out(&self) -> FanOut {
        FanOut::Grouped
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

        match self.apply(ctx, item, targets, values).await {
            Ok(name) => DeploymentRecord::new(
                item,
                target_id,
                &ctx.unit_namespace,
                RecordStatus::Deploying,
                format!("Fleet Bundle {name} created/updated successfully"),
            ),
            Err(e) => {
                warn!(error = %e, "Failed to create/update Fleet Bundle");
                DeploymentRecord::failed(
                    item,
                    target_id,
                    &ctx.unit_namespace,
                    format!("Failed to create Fleet Bundle: {e}"),
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
        let Some(first) = targets.first() else {
            return false;
        };
        let workspace = self.resolve_workspace(first).await;
        let name = Self::bundle_name(ctx, item);
        let interval = Duration::from_secs(self.settings.poll_interval_secs);

        let api = &self.api;
        let (ws, bundle_name) = (workspace.as_str(), name.as_str());
        poll_until(&name, interval, timeout, cancel, move || async move {
            let bundle = api.get_bundle(ws, bundle_name).await?;
            Ok::<_, ApiError>(Self::probe(&bundle))
        })
        .await
    }

    async fn delete(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        _targets: &[TargetId],
    ) -> Result<()> {
        let name = Self::bundle_name(ctx, item);
        let mut last_error: Option<ApiError> = None;

        for workspace in &self.settings.workspaces {
            match self.api.delete_bundle(workspace, &name).await {
                Ok(()) => {
                    info!(bundle = %name, workspace = %workspace, "Deleted Fleet Bundle");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(bundle = %name, workspace = %workspace, error = %e, "Failed to delete Fleet Bundle");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => {
                info!(bundle = %name, "Fleet Bundle not found in any workspace");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{ApiCondition, InMemoryFleetApi};
    use herd_types::{ChartRef, DeploymentUnit, StepType, TargetSpec};
    use serde_json::json;
    use tokio::time::Instant;

    fn ctx(kind: UnitKind) -> DeployContext {
        DeployContext::for_unit(&DeploymentUnit::new(
            kind,
            "web",
            "team-a",
            "dev",
            TargetSpec::explicit(["c-1"]),
            vec![],
        ))
    }

    fn item() -> WorkItem {
        WorkItem::chart(
            "redis",
            ChartRef::new("redis", "https://charts.example", "17.0.0", "cache")
                .with_release_name("cache"),
        )
        .with_timeout(Duration::from_secs(300))
    }

    fn targets(ids: &[&str]) -> Vec<TargetId> {
        ids.iter().map(|id| TargetId::new(*id)).collect()
    }

    fn values() -> Map<String, Value> {
        match json!({"replicas": 2}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_workspace_resolution() {
        let api = InMemoryFleetApi::new();
        api.add_cluster("fleet-local", "c-edge", &[]);
        let backend = BundleBackend::new(Arc::new(api));

        assert_eq!(backend.resolve_workspace(&"c-edge".into()).await, "fleet-local");
        assert_eq!(backend.resolve_workspace(&"local".into()).await, "fleet-local");
        assert_eq!(backend.resolve_workspace(&"c-9".into()).await, "fleet-default");
    }

    #[tokio::test]
    async fn test_unlistable_workspace_is_skipped() {
        let api = InMemoryFleetApi::new();
        api.add_cluster("fleet-local", "c-1", &[]);
        api.fail_workspace("fleet-default", ApiError::Status { code: 403, message: "forbidden".into() });
        let backend = BundleBackend::new(Arc::new(api));

        assert_eq!(backend.resolve_workspace(&"c-1".into()).await, "fleet-local");
    }

    #[tokio::test]
    async fn test_create_then_update_in_place() {
        let api = InMemoryFleetApi::new();
        let backend = BundleBackend::new(Arc::new(api.clone()));
        let ctx = ctx(UnitKind::Stack);

        let record = backend
            .create_or_update(&ctx, &item(), &targets(&["c-1", "c-2"]), values())
            .await;
        assert_eq!(record.status, RecordStatus::Deploying);
        assert_eq!(record.target_id.as_str(), "c-1,c-2");
        assert_eq!(record.release_name, "cache");
        assert_eq!(record.namespace, "cache");

        let bundle = api.bundle("fleet-default", "web-redis").unwrap();
        assert_eq!(bundle.spec.targets.len(), 2);
        assert_eq!(bundle.spec.helm.timeout, "300s");
        assert!(bundle.spec.helm.atomic);
        assert_eq!(bundle.labels["herd.suse.com/stack"], "web");
        assert_eq!(bundle.labels["herd.suse.com/chart"], "redis");
        assert_eq!(bundle.labels["herd.suse.com/stack-namespace"], "team-a");

        let record = backend
            .create_or_update(&ctx, &item(), &targets(&["c-1"]), Map::new())
            .await;
        assert_eq!(record.status, RecordStatus::Deploying);
        assert_eq!(api.bundle_count(), 1);
        let bundle = api.bundle("fleet-default", "web-redis").unwrap();
        assert_eq!(bundle.spec.targets.len(), 1);
        assert!(bundle.spec.helm.values.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_labels() {
        let api = InMemoryFleetApi::new();
        let backend = BundleBackend::new(Arc::new(api.clone()));
        let mut ctx = ctx(UnitKind::Pipeline).with_step_type(StepType::VectorDb);
        ctx.security = true;

        backend
            .create_or_update(&ctx, &item(), &targets(&["local"]), values())
            .await;

        let bundle = api.bundle("fleet-local", "web-redis").unwrap();
        assert_eq!(bundle.labels["herd.suse.com/pipeline"], "web");
        assert_eq!(bundle.labels["herd.suse.com/step-type"], "vector-db");
        assert_eq!(bundle.labels["herd.suse.com/security"], "true");
        assert_eq!(bundle.labels["herd.suse.com/observability"], "false");
        assert!(!bundle.labels.contains_key("herd.suse.com/stack"));
    }

    #[tokio::test]
    async fn test_api_failure_becomes_failed_record() {
        let api = InMemoryFleetApi::new();
        api.fail_bundle("web-redis", ApiError::Status { code: 422, message: "invalid".into() });
        let backend = BundleBackend::new(Arc::new(api));

        let record = backend
            .create_or_update(&ctx(UnitKind::Stack), &item(), &targets(&["c-1"]), values())
            .await;
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.message.unwrap().contains("invalid"));
    }

    #[tokio::test]
    async fn test_no_targets_becomes_failed_record() {
        let backend = BundleBackend::new(Arc::new(InMemoryFleetApi::new()));
        let record = backend
            .create_or_update(&ctx(UnitKind::Stack), &item(), &[], values())
            .await;
        assert!(record.is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_and_terminal_conditions() {
        let api = InMemoryFleetApi::new();
        let backend = BundleBackend::new(Arc::new(api.clone()));
        let ctx = ctx(UnitKind::Stack);
        let targets = targets(&["c-1"]);
        let cancel = CancellationToken::new();

        backend.create_or_update(&ctx, &item(), &targets, values()).await;

        api.set_conditions(
            "fleet-default",
            "web-redis",
            vec![ApiCondition::new("Ready", "False").with_reason("Failed")],
        );
        let start = Instant::now();
        assert!(!backend
            .wait_until_ready(&ctx, &item(), &targets, Duration::from_secs(300), &cancel)
            .await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        api.set_conditions("fleet-default", "web-redis", vec![ApiCondition::new("Stalled", "True")]);
        assert!(!backend
            .wait_until_ready(&ctx, &item(), &targets, Duration::from_secs(300), &cancel)
            .await);

        api.set_conditions("fleet-default", "web-redis", vec![ApiCondition::new("Ready", "True")]);
        assert!(backend
            .wait_until_ready(&ctx, &item(), &targets, Duration::from_secs(300), &cancel)
            .await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_on_pending_bundle() {
        let api = InMemoryFleetApi::new();
        let backend = BundleBackend::new(Arc::new(api.clone()));
        let ctx = ctx(UnitKind::Stack);
        let targets = targets(&["c-1"]);

        backend.create_or_update(&ctx, &item(), &targets, values()).await;

        let start = Instant::now();
        let ready = backend
            .wait_until_ready(&ctx, &item(), &targets, Duration::from_secs(30), &CancellationToken::new())
            .await;
        assert!(!ready);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test]
    async fn test_delete_walks_workspaces() {
        let api = InMemoryFleetApi::new();
        api.add_cluster("fleet-local", "c-1", &[]);
        let backend = BundleBackend::new(Arc::new(api.clone()));
        let ctx = ctx(UnitKind::Stack);

        backend.create_or_update(&ctx, &item(), &targets(&["c-1"]), values()).await;
        backend.delete(&ctx, &item(), &targets(&["c-1"])).await.unwrap();

        assert_eq!(api.bundle_count(), 0);
        assert_eq!(
            api.delete_calls(),
            vec![
                ("fleet-default".to_string(), "web-redis".to_string()),
                ("fleet-local".to_string(), "web-redis".to_string()),
            ]
        );

        // already gone
        backend.delete(&ctx, &item(), &targets(&["c-1"])).await.unwrap();
    }
}
