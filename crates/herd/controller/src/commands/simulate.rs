//! `herdctl simulate`
//!
//! Runs the controller against in-memory Fleet and Rancher APIs that report
//! every resource ready as soon as it is written.

use super::{config_source, load_unit};
use crate::cli::ClusterArg;
use crate::config::{HerdConfig, StackBackend};
use crate::error::CliResult;
use herd_backend::{
    AppBackend, BundleBackend, DeploymentBackend, FleetApi, InMemoryFleetApi, InMemoryRancherApi,
    RancherApi, StepBackend,
};
use herd_engine::{
    Controller, FleetTargetResolver, RancherTargetResolver, ReconciliationEngine, TargetResolver,
    TracingStatusSink,
};
use herd_types::{DeploymentUnit, StatusView, TargetSpec, UnitKind};
use herd_values::{ConfigSourceProvider, ValuesMerger};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// What a simulation produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub status: StatusView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<TeardownSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownSummary {
    pub attempted: usize,
    pub failed: usize,
}

/// Print the final status view (and teardown summary) as JSON
pub async fn execute(
    manifest: &Path,
    values_dir: Option<&Path>,
    clusters: &[ClusterArg],
    teardown: bool,
    config: &HerdConfig,
) -> CliResult<()> {
    let unit = load_unit(manifest).await?;
    let report = simulate(unit, config_source(values_dir), clusters, teardown, config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run one apply pass, and optionally a teardown, against in-memory APIs
pub async fn simulate(
    mut unit: DeploymentUnit,
    provider: Arc<dyn ConfigSourceProvider>,
    clusters: &[ClusterArg],
    teardown: bool,
    config: &HerdConfig,
) -> CliResult<SimulationReport> {
    for item in &mut unit.items {
        item.timeout = config.controller.capped(item.timeout);
    }

    let fleet = InMemoryFleetApi::new().with_auto_ready();
    let rancher = InMemoryRancherApi::new().with_auto_ready();
    for cluster in inventory(&unit, clusters) {
        let workspace = if cluster.id == config.fleet.local_cluster {
            &config.fleet.local_workspace
        } else {
            &config.fleet.default_workspace
        };
        fleet.add_cluster(workspace, &cluster.id, &cluster.label_pairs());
        rancher.add_cluster(&cluster.id, &cluster.id, &cluster.label_pairs());
    }

    let fleet: Arc<dyn FleetApi> = Arc::new(fleet);
    let rancher: Arc<dyn RancherApi> = Arc::new(rancher);
    let bundles: Arc<dyn DeploymentBackend> =
        Arc::new(BundleBackend::with_settings(fleet.clone(), config.fleet.clone()));
    let fleet_targets: Arc<dyn TargetResolver> = Arc::new(FleetTargetResolver::new(
        fleet,
        config.fleet.workspaces.clone(),
    ));

    let (backend, targets): (Arc<dyn DeploymentBackend>, Arc<dyn TargetResolver>) =
        match (unit.kind, config.controller.stack_backend) {
            (UnitKind::Pipeline, _) => {
                let steps: Arc<dyn DeploymentBackend> =
                    Arc::new(StepBackend::with_chart_handlers(bundles));
                (steps, fleet_targets)
            }
            (UnitKind::Stack, StackBackend::Bundle) => (bundles, fleet_targets),
            (UnitKind::Stack, StackBackend::App) => {
                let apps: Arc<dyn DeploymentBackend> = Arc::new(
                    AppBackend::new(rancher.clone())
                        .with_poll_interval(config.rancher.poll_interval()),
                );
                let resolver: Arc<dyn TargetResolver> =
                    Arc::new(RancherTargetResolver::new(rancher));
                (apps, resolver)
            }
        };
    info!(unit = %unit.name, backend = backend.name(), "Simulating reconciliation");

    let engine = ReconciliationEngine::new(
        targets,
        ValuesMerger::with_config(provider, config.values.clone()),
        backend,
        Arc::new(TracingStatusSink),
    );
    let controller = Controller::new(Arc::new(engine));

    let status = controller.on_create(&unit).await?;
    let teardown = if teardown {
        let outcome = controller.on_delete(&unit).await;
        Some(TeardownSummary {
            attempted: outcome.attempted,
            failed: outcome.failed,
        })
    } else {
        None
    };

    Ok(SimulationReport {
        status: status.to_view(),
        teardown,
    })
}

/// Clusters to simulate: the ones given, or the unit's explicit targets
fn inventory(unit: &DeploymentUnit, clusters: &[ClusterArg]) -> Vec<ClusterArg> {
    if !clusters.is_empty() {
        return clusters.to_vec();
    }
    match &unit.targets {
        TargetSpec::Explicit(ids) => ids.iter().map(|id| ClusterArg::new(id.as_str())).collect(),
        TargetSpec::Selector(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_types::UnitManifest;

    const STACK: &str = r#"
kind: Stack
metadata:
  name: web
  generation: 2
spec:
  env: prod
  targets:
    selector:
      matchLabels:
        env: prod
  charts:
    - name: api
      repo: https://charts.example
      version: 1.0.0
      namespace: apps
      releaseName: api
      dependsOn: [db]
      values:
        inline:
          replicas: 2
    - name: db
      repo: https://charts.example
      version: 2.0.0
      namespace: data
      releaseName: db
"#;

    const PIPELINE: &str = r#"
kind: Pipeline
metadata:
  name: rag
  namespace: ml
spec:
  env: dev
  targets:
    clusterIds: [local]
  steps:
    - name: model
      type: llm
      config:
        chart: {name: vllm, repo: https://charts.example, version: 0.1.0}
    - name: ingest
      type: ingestion
      dependsOn: [model]
"#;

    fn unit(doc: &str) -> DeploymentUnit {
        UnitManifest::from_yaml(doc).unwrap().into_unit().unwrap()
    }

    fn clusters() -> Vec<ClusterArg> {
        vec![
            "c-1:env=prod".parse().unwrap(),
            "c-2:env=dev".parse().unwrap(),
            "c-3:env=prod".parse().unwrap(),
        ]
    }

    #[tokio::test]
    async fn test_simulate_stack_with_bundles() {
        let report = simulate(
            unit(STACK),
            config_source(None),
            &clusters(),
            true,
            &HerdConfig::default(),
        )
        .await
        .unwrap();

        let status = report.status;
        assert_eq!(status.phase, "Deployed");
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(status.target_clusters, vec!["c-1", "c-3"]);

        let deployments = status.deployments.unwrap();
        assert_eq!(deployments.len(), 2);
        assert_eq!(deployments[0].chart_name, "db");
        assert_eq!(deployments[0].cluster_id, "c-1,c-3");
        assert_eq!(
            report.teardown,
            Some(TeardownSummary {
                attempted: 2,
                failed: 0
            })
        );
    }

    #[tokio::test]
    async fn test_simulate_stack_with_apps() {
        let mut config = HerdConfig::default();
        config.controller.stack_backend = StackBackend::App;

        let report = simulate(unit(STACK), config_source(None), &clusters(), false, &config)
            .await
            .unwrap();

        let deployments = report.status.deployments.unwrap();
        let placed: Vec<_> = deployments
            .iter()
            .map(|d| format!("{}@{}", d.chart_name, d.cluster_id))
            .collect();
        assert_eq!(placed, vec!["db@c-1", "db@c-3", "api@c-1", "api@c-3"]);
        assert!(report.teardown.is_none());
    }

    #[tokio::test]
    async fn test_simulate_pipeline() {
        let report = simulate(
            unit(PIPELINE),
            config_source(None),
            &[],
            false,
            &HerdConfig::default(),
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("teardown").is_none());
        assert_eq!(json["status"]["phase"], "Failed");

        let status = report.status;
        assert_eq!(status.message, "1 steps failed");
        let steps = status.step_status.unwrap();
        assert_eq!(steps[0].step_name, "model");
        assert_eq!(steps[0].phase, "Completed");
        assert_eq!(steps[1].step_name, "ingest");
        assert_eq!(steps[1].phase, "Failed");
    }

    #[tokio::test]
    async fn test_no_matching_clusters() {
        let report = simulate(
            unit(STACK),
            config_source(None),
            &[],
            false,
            &HerdConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.status.phase, "Deployed");
        assert_eq!(report.status.message, "No target clusters found");
        assert!(report.status.deployments.unwrap().is_empty());
    }
}
