//! Stack and Pipeline manifests
//!
//! Manifests are the Kubernetes-shaped documents the controller receives
//! (`apiVersion`, `kind`, `metadata`, `spec`). They are converted into a
//! validated [`DeploymentUnit`] before any reconciliation starts.

use crate::error::{Result, ValidationError};
use crate::ids::TargetId;
use crate::timeout::parse_timeout;
use crate::unit::{
    ChartRef, DeploymentUnit, ItemKind, SourceRef, StepType, TargetSpec, UnitKind, ValuesSpec,
    WorkItem,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const MAX_RETRIES: u32 = 10;

/// A Stack or Pipeline resource as submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitManifest {
    #[serde(default)]
    pub api_version: Option<String>,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub generation: Option<i64>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl UnitManifest {
    /// Parse a YAML (or JSON) manifest document
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Convert into a validated unit
    pub fn into_unit(self) -> Result<DeploymentUnit> {
        let kind = match self.kind.as_str() {
            "Stack" => UnitKind::Stack,
            "Pipeline" => UnitKind::Pipeline,
            other => return Err(ValidationError::UnknownKind(other.to_string())),
        };

        let mut unit = match kind {
            UnitKind::Stack => {
                let spec: StackSpec = serde_json::from_value(self.spec)
                    .map_err(|e| ValidationError::Malformed(e.to_string()))?;
                spec.into_unit(&self.metadata)?
            }
            UnitKind::Pipeline => {
                let spec: PipelineSpec = serde_json::from_value(self.spec)
                    .map_err(|e| ValidationError::Malformed(e.to_string()))?;
                spec.into_unit(&self.metadata)?
            }
        };

        unit.generation = self.metadata.generation;
        unit.validate()?;
        Ok(unit)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackSpec {
    #[serde(default)]
    env: String,
    targets: TargetsDoc,
    #[serde(default)]
    charts: Vec<ChartDoc>,
}

impl StackSpec {
    fn into_unit(self, meta: &ManifestMetadata) -> Result<DeploymentUnit> {
        let targets = self.targets.into_target_spec()?;
        let items = self
            .charts
            .into_iter()
            .map(ChartDoc::into_item)
            .collect::<Result<Vec<_>>>()?;

        Ok(DeploymentUnit::new(
            UnitKind::Stack,
            meta.name.clone(),
            meta.namespace.clone(),
            self.env,
            targets,
            items,
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineSpec {
    #[serde(default)]
    env: String,
    targets: TargetsDoc,
    #[serde(default)]
    steps: Vec<StepDoc>,
    #[serde(default)]
    security: bool,
    #[serde(default)]
    observability: bool,
}

impl PipelineSpec {
    fn into_unit(self, meta: &ManifestMetadata) -> Result<DeploymentUnit> {
        if self.targets.selector.is_some() && self.targets.cluster_ids.is_none() {
            return Err(ValidationError::PipelineSelector);
        }
        let targets = self.targets.into_target_spec()?;
        let items = self
            .steps
            .into_iter()
            .map(StepDoc::into_item)
            .collect::<Result<Vec<_>>>()?;

        let mut unit = DeploymentUnit::new(
            UnitKind::Pipeline,
            meta.name.clone(),
            meta.namespace.clone(),
            self.env,
            targets,
            items,
        );
        unit.security = self.security;
        unit.observability = self.observability;
        Ok(unit)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsDoc {
    #[serde(default)]
    cluster_ids: Option<Vec<String>>,
    #[serde(default)]
    selector: Option<SelectorDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectorDoc {
    #[serde(default)]
    match_labels: BTreeMap<String, String>,
}

impl TargetsDoc {
    fn into_target_spec(self) -> Result<TargetSpec> {
        match (self.cluster_ids, self.selector) {
            (Some(ids), _) if !ids.is_empty() => Ok(TargetSpec::explicit(ids)),
            (_, Some(selector)) => Ok(TargetSpec::Selector(selector.match_labels)),
            (Some(_), None) => Ok(TargetSpec::Explicit(Vec::<TargetId>::new())),
            (None, None) => Err(ValidationError::NoTargets),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    release_name: String,
    #[serde(default)]
    values: ValuesDoc,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default = "default_true")]
    wait: bool,
    #[serde(default = "default_timeout")]
    timeout: String,
    #[serde(default = "default_true")]
    create_namespace: bool,
}

impl ChartDoc {
    fn into_item(self) -> Result<WorkItem> {
        require("chart name", &self.name)?;
        require(&format!("chart {} repo", self.name), &self.repo)?;
        require(&format!("chart {} version", self.name), &self.version)?;
        require(&format!("chart {} namespace", self.name), &self.namespace)?;
        require(&format!("chart {} releaseName", self.name), &self.release_name)?;

        Ok(WorkItem {
            kind: ItemKind::Chart(ChartRef {
                chart: self.name.clone(),
                repo: self.repo,
                version: self.version,
                namespace: self.namespace,
                release_name: self.release_name,
                create_namespace: self.create_namespace,
            }),
            name: self.name,
            depends_on: self.depends_on,
            values: self.values.into_values_spec(),
            wait: self.wait,
            timeout: parse_timeout(&self.timeout),
            retry_budget: 0,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValuesDoc {
    #[serde(default)]
    config_map_refs: Vec<RefDoc>,
    #[serde(default)]
    secret_refs: Vec<RefDoc>,
    #[serde(default)]
    per_cluster_config_map_ref: Option<RefDoc>,
    #[serde(default)]
    inline: Map<String, Value>,
}

impl ValuesDoc {
    fn into_values_spec(self) -> ValuesSpec {
        ValuesSpec {
            config_map_refs: self.config_map_refs.into_iter().map(Into::into).collect(),
            secret_refs: self.secret_refs.into_iter().map(Into::into).collect(),
            per_target_ref: self.per_cluster_config_map_ref.map(Into::into),
            inline: self.inline,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RefDoc {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default = "default_key")]
    key: String,
}

impl From<RefDoc> for SourceRef {
    fn from(doc: RefDoc) -> Self {
        SourceRef {
            name: doc.name,
            namespace: doc.namespace,
            key: doc.key,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDoc {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    step_type: String,
    #[serde(default)]
    config: Map<String, Value>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default = "default_timeout")]
    timeout: String,
    #[serde(default = "default_retries")]
    retries: u32,
}

impl StepDoc {
    fn into_item(self) -> Result<WorkItem> {
        require("step name", &self.name)?;
        let step_type: StepType = self.step_type.parse()?;
        if self.retries > MAX_RETRIES {
            return Err(ValidationError::RetriesOutOfRange {
                step: self.name,
                retries: self.retries,
            });
        }

        Ok(WorkItem {
            name: self.name,
            depends_on: self.depends_on,
            kind: ItemKind::Step(step_type),
            values: ValuesSpec {
                inline: self.config,
                ..ValuesSpec::default()
            },
            wait: true,
            timeout: parse_timeout(&self.timeout),
            retry_budget: self.retries,
        })
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> String {
    "10m".to_string()
}

fn default_key() -> String {
    SourceRef::DEFAULT_KEY.to_string()
}

fn default_retries() -> u32 {
    3
}
