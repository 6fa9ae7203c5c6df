//! Five-layer values merger

use crate::error::{Result, SourceError};
use crate::merge::deep_merge;
use crate::source::{parse_values, ConfigSourceProvider, SourceKind};
use crate::validate::validate_values;
use herd_types::{SourceRef, TargetId, ValuesSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Naming conventions used while merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// Environment overlay source names, probed in order; `{env}` is replaced
    pub overlay_candidates: Vec<String>,

    /// Key read from the environment overlay source
    pub overlay_key: String,

    /// Extension of the per-target key (`<targetId>.<ext>`)
    pub override_extension: String,

    /// Keys starting with this prefix produce validation warnings
    pub reserved_prefix: String,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            overlay_candidates: vec![
                "herd-env-{env}".to_string(),
                "stack-env-{env}".to_string(),
                "values-{env}".to_string(),
                "{env}-values".to_string(),
            ],
            overlay_key: SourceRef::DEFAULT_KEY.to_string(),
            override_extension: "yaml".to_string(),
            reserved_prefix: "_".to_string(),
        }
    }
}

impl MergerConfig {
    /// Candidate overlay names for one environment, in probe order
    pub fn overlay_names(&self, env: &str) -> Vec<String> {
        self.overlay_candidates
            .iter()
            .map(|pattern| pattern.replace("{env}", env))
            .collect()
    }

    /// Key of the per-target override for `target`
    pub fn override_key(&self, target: &TargetId) -> String {
        format!("{}.{}", target.as_str(), self.override_extension)
    }
}

/// Produces the final values for one item on one target
#[derive(Clone)]
pub struct ValuesMerger {
    provider: Arc<dyn ConfigSourceProvider>,
    config: MergerConfig,
}

impl ValuesMerger {
    /// Create a merger with default settings
    pub fn new(provider: Arc<dyn ConfigSourceProvider>) -> Self {
        Self::with_config(provider, MergerConfig::default())
    }

    /// Create a merger with explicit settings
    pub fn with_config(provider: Arc<dyn ConfigSourceProvider>, config: MergerConfig) -> Self {
        Self { provider, config }
    }

    /// Merger settings
    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Merge every layer of `spec` for `target`.
    ///
    /// `namespace` is used for references that do not name their own. Never
    /// fails: unreadable layers are logged and skipped.
    pub async fn merge(
        &self,
        spec: &ValuesSpec,
        env: &str,
        target: &TargetId,
        namespace: &str,
    ) -> Map<String, Value> {
        let mut merged = Map::new();

        for source in &spec.config_map_refs {
            if let Some(values) = self.load_ref(SourceKind::ConfigMap, source, namespace).await {
                deep_merge(&mut merged, values);
                debug!(source = %source.name, "Merged base values");
            }
        }

        if let Some(values) = self.load_env_overlay(env, namespace).await {
            deep_merge(&mut merged, values);
            debug!(env = %env, "Merged environment overlay");
        }

        if let Some(source) = &spec.per_target_ref {
            if let Some(values) = self.load_target_override(source, target, namespace).await {
                deep_merge(&mut merged, values);
                debug!(target = %target, "Merged per-target override");
            }
        }

        for source in &spec.secret_refs {
            if let Some(values) = self.load_ref(SourceKind::Secret, source, namespace).await {
                deep_merge(&mut merged, values);
                debug!(source = %source.name, "Merged secret values");
            }
        }

        if !spec.inline.is_empty() {
            deep_merge(&mut merged, spec.inline.clone());
            debug!("Merged inline values");
        }

        merged
    }

    /// Warnings for a merged result, using the configured reserved prefix
    pub fn validate(&self, values: &Map<String, Value>) -> Vec<String> {
        validate_values(values, &self.config.reserved_prefix)
    }

    async fn load_ref(
        &self,
        kind: SourceKind,
        source: &SourceRef,
        default_namespace: &str,
    ) -> Option<Map<String, Value>> {
        let namespace = source.namespace_or(default_namespace);
        match self.fetch(kind, namespace, &source.name, &source.key).await {
            Ok(values) => {
                info!(kind = %kind, namespace = %namespace, source = %source.name, "Loaded values");
                Some(values)
            }
            Err(e) if e.is_absent() => {
                warn!(error = %e, "Values source unavailable, skipping");
                None
            }
            Err(e) => {
                warn!(
                    kind = %kind,
                    namespace = %namespace,
                    source = %source.name,
                    error = %e,
                    "Failed to load values, skipping"
                );
                None
            }
        }
    }

    async fn load_env_overlay(&self, env: &str, namespace: &str) -> Option<Map<String, Value>> {
        for name in self.config.overlay_names(env) {
            match self
                .fetch(SourceKind::ConfigMap, namespace, &name, &self.config.overlay_key)
                .await
            {
                Ok(values) if !values.is_empty() => {
                    info!(namespace = %namespace, source = %name, "Loaded environment overlay");
                    return Some(values);
                }
                Ok(_) => debug!(source = %name, "Environment overlay candidate is empty"),
                Err(e) if e.is_absent() => {}
                Err(e) => warn!(source = %name, error = %e, "Failed to load environment overlay"),
            }
        }

        debug!(env = %env, "No environment overlay found");
        None
    }

    async fn load_target_override(
        &self,
        source: &SourceRef,
        target: &TargetId,
        default_namespace: &str,
    ) -> Option<Map<String, Value>> {
        let namespace = source.namespace_or(default_namespace);
        let key = self.config.override_key(target);
        match self
            .fetch(SourceKind::ConfigMap, namespace, &source.name, &key)
            .await
        {
            Ok(values) => {
                info!(target = %target, source = %source.name, "Loaded per-target override");
                Some(values)
            }
            Err(SourceError::MissingKey { .. }) => {
                debug!(target = %target, "No per-target override");
                None
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Failed to load per-target override");
                None
            }
        }
    }

    async fn fetch(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Map<String, Value>> {
        let raw = self.provider.get(kind, namespace, name, key).await?;
        let text = kind.decode(&raw)?;
        parse_values(&text)
    }
}
