//! Deployment units and their work items
//!
//! A DeploymentUnit is the in-memory form of one Stack or Pipeline resource.
//! It is immutable for the duration of a reconciliation pass.

use crate::error::{Result, ValidationError};
use crate::ids::TargetId;
use crate::timeout::DEFAULT_TIMEOUT;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which top-level resource a unit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// Ordered Helm charts
    Stack,
    /// Ordered pipeline steps
    Pipeline,
}

impl UnitKind {
    /// Kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Stack => "Stack",
            UnitKind::Pipeline => "Pipeline",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reconciliation scope: environment, targets and ordered items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    /// Resource name, used to derive backend resource names
    pub name: String,

    /// Resource namespace, default namespace for value sources
    pub namespace: String,

    /// Resource generation reported back as `observedGeneration`
    pub generation: Option<i64>,

    pub kind: UnitKind,

    /// Environment name (dev, staging, prod, ...)
    pub env: String,

    pub targets: TargetSpec,

    /// Items in declaration order
    pub items: Vec<WorkItem>,

    /// Pipeline flag: request security scanning of step components
    #[serde(default)]
    pub security: bool,

    /// Pipeline flag: request observability wiring of step components
    #[serde(default)]
    pub observability: bool,
}

impl DeploymentUnit {
    /// Create a unit
    pub fn new(
        kind: UnitKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        env: impl Into<String>,
        targets: TargetSpec,
        items: Vec<WorkItem>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            generation: None,
            kind,
            env: env.into(),
            targets,
            items,
            security: false,
            observability: false,
        }
    }

    /// Find an item by name
    pub fn item(&self, name: &str) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Check the structural invariants every pass relies on
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("metadata.name".into()));
        }
        if self.env.trim().is_empty() {
            return Err(ValidationError::MissingField("spec.env".into()));
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if item.name.is_empty() {
                return Err(ValidationError::MissingField("item name".into()));
            }
            if !seen.insert(item.name.as_str()) {
                return Err(ValidationError::DuplicateItem(item.name.clone()));
            }
        }

        if self.kind == UnitKind::Pipeline && matches!(self.targets, TargetSpec::Selector(_)) {
            return Err(ValidationError::PipelineSelector);
        }

        Ok(())
    }
}

/// Where a unit should be deployed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetSpec {
    /// Ordered set of cluster ids
    Explicit(Vec<TargetId>),
    /// Every cluster whose labels contain all of these pairs
    Selector(BTreeMap<String, String>),
}

impl TargetSpec {
    /// Build an explicit target set, dropping repeated ids but keeping order
    pub fn explicit<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TargetId>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &TargetId| seen.insert(id.clone()))
            .collect();
        TargetSpec::Explicit(ids)
    }

    /// Select clusters by labels
    pub fn selector<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        TargetSpec::Selector(
            labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Exact key/value matching: every selector pair must be present
pub fn labels_match<'a, L>(selector: &BTreeMap<String, String>, labels: L) -> bool
where
    L: Fn(&str) -> Option<&'a str>,
{
    selector
        .iter()
        .all(|(key, value)| labels(key) == Some(value.as_str()))
}

/// A single deployable item within a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique within the unit
    pub name: String,

    /// Names of items that must be applied first, in listed order
    pub depends_on: Vec<String>,

    pub kind: ItemKind,

    /// Layered value sources
    pub values: ValuesSpec,

    /// Wait for readiness after create/update
    pub wait: bool,

    pub timeout: Duration,

    /// Declared retry budget. Retries are left to the calling framework.
    pub retry_budget: u32,
}

impl WorkItem {
    /// Create a chart item
    pub fn chart(name: impl Into<String>, chart: ChartRef) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            kind: ItemKind::Chart(chart),
            values: ValuesSpec::default(),
            wait: true,
            timeout: DEFAULT_TIMEOUT,
            retry_budget: 0,
        }
    }

    /// Create a pipeline step
    pub fn step(name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            kind: ItemKind::Step(step_type),
            values: ValuesSpec::default(),
            wait: true,
            timeout: DEFAULT_TIMEOUT,
            retry_budget: 3,
        }
    }

    /// Add dependencies
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the values sources
    pub fn with_values(mut self, values: ValuesSpec) -> Self {
        self.values = values;
        self
    }

    /// Set inline values only
    pub fn with_inline(mut self, inline: Map<String, Value>) -> Self {
        self.values.inline = inline;
        self
    }

    /// Set the readiness timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Do not wait for readiness
    pub fn without_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    /// Chart coordinates, for chart items
    pub fn chart_ref(&self) -> Option<&ChartRef> {
        match &self.kind {
            ItemKind::Chart(chart) => Some(chart),
            ItemKind::Step(_) => None,
        }
    }

    /// Step type, for pipeline steps
    pub fn step_type(&self) -> Option<StepType> {
        match &self.kind {
            ItemKind::Step(step_type) => Some(*step_type),
            ItemKind::Chart(_) => None,
        }
    }

    /// Release name recorded for this item; steps use their own name
    pub fn release_name(&self) -> &str {
        match &self.kind {
            ItemKind::Chart(chart) => &chart.release_name,
            ItemKind::Step(_) => &self.name,
        }
    }

    /// Namespace the item lands in; steps use the unit's namespace
    pub fn target_namespace<'a>(&'a self, unit_namespace: &'a str) -> &'a str {
        match &self.kind {
            ItemKind::Chart(chart) => &chart.namespace,
            ItemKind::Step(_) => unit_namespace,
        }
    }

    /// Chart version, or empty for steps
    pub fn version(&self) -> &str {
        match &self.kind {
            ItemKind::Chart(chart) => &chart.version,
            ItemKind::Step(_) => "",
        }
    }
}

/// What an item deploys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Chart(ChartRef),
    Step(StepType),
}

/// Coordinates of a Helm chart release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    pub chart: String,
    pub repo: String,
    pub version: String,
    pub namespace: String,
    pub release_name: String,
    pub create_namespace: bool,
}

impl ChartRef {
    /// Create chart coordinates; the release is named after the chart
    pub fn new(
        chart: impl Into<String>,
        repo: impl Into<String>,
        version: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let chart = chart.into();
        Self {
            release_name: chart.clone(),
            chart,
            repo: repo.into(),
            version: version.into(),
            namespace: namespace.into(),
            create_namespace: true,
        }
    }

    /// Set the release name
    pub fn with_release_name(mut self, release_name: impl Into<String>) -> Self {
        self.release_name = release_name.into();
        self
    }
}

/// Kind of pipeline step; each tag has its own handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    Ingestion,
    VectorDb,
    Llm,
    Service,
}

impl StepType {
    /// Every step type
    pub const ALL: [StepType; 4] = [
        StepType::Ingestion,
        StepType::VectorDb,
        StepType::Llm,
        StepType::Service,
    ];

    /// Step type name
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Ingestion => "ingestion",
            StepType::VectorDb => "vector-db",
            StepType::Llm => "llm",
            StepType::Service => "service",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        StepType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStepType(s.to_string()))
    }
}

/// Value sources for one item, lowest precedence first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuesSpec {
    /// Base config references, merged left to right
    pub config_map_refs: Vec<SourceRef>,

    /// Secret-backed references, merged left to right after overrides
    pub secret_refs: Vec<SourceRef>,

    /// Shared source holding one `<targetId>.yaml` key per target
    pub per_target_ref: Option<SourceRef>,

    /// Inline values, always applied last
    pub inline: Map<String, Value>,
}

/// Reference to one key of a named config source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    /// Falls back to the unit's namespace
    pub namespace: Option<String>,
    pub key: String,
}

impl SourceRef {
    /// Key read when none is given
    pub const DEFAULT_KEY: &'static str = "values.yaml";

    /// Reference a source by name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            key: Self::DEFAULT_KEY.to_string(),
        }
    }

    /// Read from another namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Read another key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// The namespace to read from
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}
