//! End-to-end reconciliation scenarios over in-memory collaborators

use async_trait::async_trait;
use herd_backend::{
    ApiError, AppBackend, BundleBackend, DeployContext, DeploymentBackend, FanOut,
    InMemoryFleetApi, InMemoryRancherApi, StepBackend,
};
use herd_engine::{
    Controller, InMemoryStatusSink, ReconciliationEngine, StaticTargetResolver,
    TargetResolutionError, TargetResolver, UnitRef, CANCELLED_MESSAGE,
};
use herd_types::{
    ChartRef, DeploymentRecord, DeploymentUnit, Phase, RecordStatus, SourceRef, StepType,
    TargetId, TargetSpec, UnitKind, ValuesSpec, WorkItem,
};
use herd_values::{InMemoryConfigSource, ValuesMerger};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn chart(name: &str) -> WorkItem {
    WorkItem::chart(
        name,
        ChartRef::new(name, "https://charts.example", "1.2.3", "apps"),
    )
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn stack(targets: TargetSpec, items: Vec<WorkItem>) -> DeploymentUnit {
    DeploymentUnit::new(UnitKind::Stack, "web", "default", "prod", targets, items)
}

fn engine_with(
    targets: impl TargetResolver + 'static,
    source: &InMemoryConfigSource,
    backend: Arc<dyn DeploymentBackend>,
    sink: &InMemoryStatusSink,
) -> ReconciliationEngine {
    ReconciliationEngine::new(
        Arc::new(targets),
        ValuesMerger::new(Arc::new(source.clone())),
        backend,
        Arc::new(sink.clone()),
    )
}

fn fleet_engine(api: &InMemoryFleetApi, sink: &InMemoryStatusSink) -> ReconciliationEngine {
    engine_with(
        StaticTargetResolver::new(),
        &InMemoryConfigSource::new(),
        Arc::new(BundleBackend::new(Arc::new(api.clone()))),
        sink,
    )
}

/// Counts every call it receives
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl DeploymentBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn fan_out(&self) -> FanOut {
        FanOut::Grouped
    }

    async fn create_or_update(
        &self,
        ctx: &DeployContext,
        item: &WorkItem,
        targets: &[TargetId],
        _values: Map<String, Value>,
    ) -> DeploymentRecord {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DeploymentRecord::new(
            item,
            TargetId::joined(targets),
            &ctx.unit_namespace,
            RecordStatus::Deploying,
            "ok",
        )
    }

    async fn wait_until_ready(
        &self,
        _ctx: &DeployContext,
        _item: &WorkItem,
        _targets: &[TargetId],
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn delete(
        &self,
        _ctx: &DeployContext,
        _item: &WorkItem,
        _targets: &[TargetId],
    ) -> herd_backend::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_empty_targets_apply_is_a_no_op() {
    let backend = Arc::new(CountingBackend::default());
    let sink = InMemoryStatusSink::new();
    let engine = engine_with(
        StaticTargetResolver::new().with_cluster("c-1", &[("env", "dev")]),
        &InMemoryConfigSource::new(),
        backend.clone(),
        &sink,
    );
    let unit = stack(
        TargetSpec::selector([("env", "prod")]),
        vec![chart("db"), chart("app").depends_on(["db"])],
    );

    let outcome = engine.apply(&unit, &CancellationToken::new()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.status.phase, Phase::Deployed);
    assert!(outcome.status.target_clusters.is_empty());
    assert!(outcome.status.records.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

    let view = outcome.status.to_view();
    assert_eq!(view.phase, "Deployed");
    assert_eq!(view.conditions[0].status, "True");

    // Grouped deletes go by name, one per item
    assert_eq!(engine.teardown(&unit).await.attempted, 2);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

/// Cluster listing that is always down
struct UnreachableResolver;

#[async_trait]
impl TargetResolver for UnreachableResolver {
    async fn resolve(&self, _spec: &TargetSpec) -> Result<Vec<TargetId>, TargetResolutionError> {
        Err(ApiError::Transport("connection refused".into()).into())
    }
}

#[tokio::test]
async fn test_teardown_deletes_bundles_when_targets_cannot_be_resolved() {
    let api = InMemoryFleetApi::new().with_auto_ready();
    let sink = InMemoryStatusSink::new();
    let unit = stack(
        TargetSpec::selector([("env", "prod")]),
        vec![chart("db"), chart("app").depends_on(["db"])],
    );

    let applying = engine_with(
        StaticTargetResolver::new().with_cluster("c-1", &[("env", "prod")]),
        &InMemoryConfigSource::new(),
        Arc::new(BundleBackend::new(Arc::new(api.clone()))),
        &sink,
    );
    assert!(applying.apply(&unit, &CancellationToken::new()).await.is_success());
    assert_eq!(api.bundle_count(), 2);

    let deleting = engine_with(
        UnreachableResolver,
        &InMemoryConfigSource::new(),
        Arc::new(BundleBackend::new(Arc::new(api.clone()))),
        &sink,
    );
    let teardown = deleting.teardown(&unit).await;

    assert_eq!(teardown.attempted, 2);
    assert_eq!(teardown.failed, 0);
    assert_eq!(api.bundle_count(), 0);
}

#[tokio::test]
async fn test_failed_item_does_not_stop_later_items() {
    let api = InMemoryFleetApi::new().with_auto_ready();
    api.fail_bundle("web-broken", ApiError::Status {
        code: 422,
        message: "invalid chart".into(),
    });
    let sink = InMemoryStatusSink::new();
    let unit = stack(
        TargetSpec::explicit(["local"]),
        vec![chart("broken"), chart("cache")],
    );

    let outcome = fleet_engine(&api, &sink)
        .apply(&unit, &CancellationToken::new())
        .await;

    assert!(outcome.error.is_none());
    assert_eq!(outcome.status.phase, Phase::Failed);
    assert_eq!(outcome.status.message, "1 chart deployments failed");

    let records = &outcome.status.records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].item_name, "broken");
    assert_eq!(records[0].status, RecordStatus::Failed);
    assert!(records[0]
        .message
        .as_deref()
        .unwrap()
        .starts_with("Failed to create Fleet Bundle"));
    assert_eq!(records[1].item_name, "cache");
    assert_eq!(records[1].status, RecordStatus::Deployed);

    let view = outcome.status.to_view();
    assert_eq!(view.conditions[0].reason.as_deref(), Some("DeploymentFailed"));
    assert_eq!(view.deployments.unwrap().len(), 2);
}

#[tokio::test]
async fn test_teardown_reaches_every_target() {
    let api = InMemoryRancherApi::new().with_auto_ready();
    api.add_cluster("c-1", "east", &[]);
    api.add_cluster("c-2", "west", &[]);
    let sink = InMemoryStatusSink::new();
    let engine = engine_with(
        StaticTargetResolver::new(),
        &InMemoryConfigSource::new(),
        Arc::new(AppBackend::new(Arc::new(api.clone()))),
        &sink,
    );
    let unit = stack(TargetSpec::explicit(["c-1", "c-2"]), vec![chart("api")]);

    let outcome = engine.apply(&unit, &CancellationToken::new()).await;
    assert!(outcome.is_success());
    let targets: Vec<_> = outcome
        .status
        .records
        .iter()
        .map(|r| r.target_id.as_str())
        .collect();
    assert_eq!(targets, vec!["c-1", "c-2"]);
    assert_eq!(api.app_count(), 2);

    api.fail_cluster("c-1", ApiError::Status {
        code: 404,
        message: "cluster gone".into(),
    });
    let teardown = engine.teardown(&unit).await;

    let clusters: Vec<_> = api.delete_calls().into_iter().map(|(c, _, _)| c).collect();
    assert_eq!(clusters, vec!["c-1", "c-2"]);
    assert_eq!(teardown.attempted, 2);
    assert_eq!(teardown.failed, 0);
    assert!(api.app("c-2", "apps", "api").is_none());
}

#[tokio::test]
async fn test_teardown_swallows_errors_in_reverse_order() {
    let api = InMemoryRancherApi::new().with_auto_ready();
    let sink = InMemoryStatusSink::new();
    let engine = engine_with(
        StaticTargetResolver::new(),
        &InMemoryConfigSource::new(),
        Arc::new(AppBackend::new(Arc::new(api.clone()))),
        &sink,
    );
    let unit = stack(
        TargetSpec::explicit(["c-1", "c-2"]),
        vec![chart("app").depends_on(["db"]), chart("db")],
    );
    engine.apply(&unit, &CancellationToken::new()).await;

    api.fail_cluster("c-1", ApiError::Transport("connection reset".into()));
    let teardown = engine.teardown(&unit).await;

    let calls: Vec<_> = api
        .delete_calls()
        .into_iter()
        .map(|(c, _, name)| format!("{name}@{c}"))
        .collect();
    assert_eq!(calls, vec!["app@c-1", "app@c-2", "db@c-1", "db@c-2"]);
    assert_eq!(teardown.attempted, 4);
    assert_eq!(teardown.failed, 2);
}

#[tokio::test]
async fn test_layered_values_reach_the_bundle() {
    let source = InMemoryConfigSource::new();
    source.insert_config_map("default", "web-base", "values.yaml", "a: 1\nb:\n  x: 1\ntags: [1, 2]\n");
    source.insert_config_map("default", "herd-env-prod", "values.yaml", "b:\n  y: 2\n");
    source.insert_secret("default", "web-secret", "values.yaml", "tags: [3]\n");

    let api = InMemoryFleetApi::new().with_auto_ready();
    let sink = InMemoryStatusSink::new();
    let engine = engine_with(
        StaticTargetResolver::new(),
        &source,
        Arc::new(BundleBackend::new(Arc::new(api.clone()))),
        &sink,
    );

    let values = ValuesSpec {
        config_map_refs: vec![SourceRef::new("web-base")],
        secret_refs: vec![SourceRef::new("web-secret")],
        inline: object(json!({"a": 3})),
        ..ValuesSpec::default()
    };
    let unit = stack(
        TargetSpec::explicit(["local"]),
        vec![chart("frontend").with_values(values)],
    );

    let outcome = engine.apply(&unit, &CancellationToken::new()).await;
    assert!(outcome.is_success());

    let bundle = api.bundle("fleet-local", "web-frontend").unwrap();
    assert_eq!(
        Value::Object(bundle.spec.helm.values),
        json!({"a": 3, "b": {"x": 1, "y": 2}, "tags": [3]})
    );
}

#[tokio::test]
async fn test_cycle_aborts_before_any_item() {
    let api = InMemoryFleetApi::new().with_auto_ready();
    let sink = InMemoryStatusSink::new();
    let controller = Controller::new(Arc::new(fleet_engine(&api, &sink)));
    let unit = stack(
        TargetSpec::explicit(["local"]),
        vec![
            chart("standalone"),
            chart("A").depends_on(["B"]),
            chart("B").depends_on(["A"]),
        ],
    );

    let err = controller.on_create(&unit).await.unwrap_err();

    assert!(err.is_permanent());
    assert!(err.to_string().contains("A -> B -> A"));
    assert_eq!(api.bundle_count(), 0);

    let latest = sink.latest(&UnitRef::of(&unit)).unwrap();
    assert_eq!(latest.phase, Phase::Failed);
    assert!(latest.records.is_empty());
    assert!(latest.message.starts_with("Circular dependency detected"));
}

#[tokio::test]
async fn test_create_reports_pending_first() {
    let api = InMemoryFleetApi::new().with_auto_ready();
    let sink = InMemoryStatusSink::new();
    let controller = Controller::new(Arc::new(fleet_engine(&api, &sink)));
    let mut unit = stack(TargetSpec::explicit(["local"]), vec![chart("db")]);
    unit.generation = Some(4);

    let status = controller.on_create(&unit).await.unwrap();
    assert_eq!(status.phase, Phase::Deployed);
    assert_eq!(status.observed_generation, Some(4));
    assert!(!controller.is_in_flight(&unit));

    controller.on_update(&unit).await.unwrap();
    assert_eq!(api.bundle_count(), 1);

    let history = sink.history(&UnitRef::of(&unit));
    assert_eq!(history[0].phase, Phase::Pending);
    assert_eq!(history[0].message, "Stack creation started");
    let update = history
        .iter()
        .position(|s| s.message == "Stack update started")
        .unwrap();
    assert_eq!(history[update].phase, Phase::Pending);
    assert_eq!(history.last().unwrap().records.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_cancels_pending_wait() {
    // Never ready: the first item waits until cancelled
    let api = InMemoryFleetApi::new();
    let sink = InMemoryStatusSink::new();
    let controller = Arc::new(Controller::new(Arc::new(fleet_engine(&api, &sink))));
    let unit = stack(
        TargetSpec::explicit(["local"]),
        vec![chart("slow"), chart("after").depends_on(["slow"])],
    );

    let create = {
        let controller = controller.clone();
        let unit = unit.clone();
        tokio::spawn(async move { controller.on_create(&unit).await })
    };

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(controller.is_in_flight(&unit));

    let teardown = controller.on_delete(&unit).await;
    let status = create.await.unwrap().unwrap();

    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.message, CANCELLED_MESSAGE);
    assert_eq!(status.records.len(), 1);
    assert_eq!(status.records[0].message.as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(teardown.attempted, 2);
    assert!(api.bundle("fleet-local", "web-after").is_none());
    assert!(!controller.is_in_flight(&unit));

    let phases: Vec<_> = sink
        .history(&UnitRef::of(&unit))
        .iter()
        .map(|s| s.phase)
        .collect();
    assert_eq!(
        phases,
        vec![Phase::Pending, Phase::Deploying, Phase::Failed, Phase::Deleting]
    );
}

#[tokio::test]
async fn test_pipeline_runs_steps_as_charts() {
    let api = InMemoryFleetApi::new().with_auto_ready();
    let sink = InMemoryStatusSink::new();
    let inner: Arc<dyn DeploymentBackend> = Arc::new(BundleBackend::new(Arc::new(api.clone())));
    let engine = engine_with(
        StaticTargetResolver::new(),
        &InMemoryConfigSource::new(),
        Arc::new(StepBackend::with_chart_handlers(inner)),
        &sink,
    );

    let step = |name: &str, step_type: StepType, chart: &str| {
        WorkItem::step(name, step_type).with_inline(object(json!({
            "chart": {"name": chart, "repo": "https://charts.example", "version": "0.1.0"},
            "replicas": 1
        })))
    };
    let mut unit = DeploymentUnit::new(
        UnitKind::Pipeline,
        "rag",
        "ml",
        "dev",
        TargetSpec::explicit(["local"]),
        vec![
            step("serve", StepType::Service, "api").depends_on(["model"]),
            step("model", StepType::Llm, "vllm"),
        ],
    );
    unit.security = true;

    let outcome = engine.apply(&unit, &CancellationToken::new()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.status.message, "All steps executed successfully");

    let view = outcome.status.to_view();
    assert_eq!(view.phase, "Completed");
    assert!(view.deployments.is_none());
    let steps = view.step_status.unwrap();
    assert_eq!(steps[0].step_name, "model");
    assert_eq!(steps[0].step_type, "llm");
    assert_eq!(steps[0].phase, "Completed");
    assert_eq!(steps[1].step_name, "serve");

    let bundle = api.bundle("fleet-local", "rag-serve").unwrap();
    assert_eq!(bundle.labels["herd.suse.com/pipeline"], "rag");
    assert_eq!(bundle.labels["herd.suse.com/security"], "true");
    assert_eq!(Value::Object(bundle.spec.helm.values), json!({"replicas": 1}));
}
