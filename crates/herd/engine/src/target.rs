//! Target resolution: from a target spec to an ordered set of cluster ids

use crate::error::TargetResolutionError;
use async_trait::async_trait;
use herd_backend::{FleetApi, RancherApi};
use herd_types::{labels_match, TargetId, TargetSpec};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolves a [`TargetSpec`] into cluster ids.
///
/// Explicit specs resolve to themselves; selectors require listing
/// candidate clusters with their labels. The result may be empty.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, spec: &TargetSpec) -> Result<Vec<TargetId>, TargetResolutionError>;
}

fn explicit(ids: &[TargetId]) -> Vec<TargetId> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

/// Resolves selectors against Fleet clusters in every configured workspace
pub struct FleetTargetResolver {
    api: Arc<dyn FleetApi>,
    workspaces: Vec<String>,
}

impl FleetTargetResolver {
    /// Create a resolver over the given workspaces
    pub fn new(api: Arc<dyn FleetApi>, workspaces: Vec<String>) -> Self {
        Self { api, workspaces }
    }
}

#[async_trait]
impl TargetResolver for FleetTargetResolver {
    async fn resolve(&self, spec: &TargetSpec) -> Result<Vec<TargetId>, TargetResolutionError> {
        let selector = match spec {
            TargetSpec::Explicit(ids) => {
                info!(targets = %TargetId::joined(ids), "Using explicit cluster ids");
                return Ok(explicit(ids));
            }
            TargetSpec::Selector(selector) => selector,
        };

        let mut matched = Vec::new();
        let mut seen = HashSet::new();
        for workspace in &self.workspaces {
            let clusters = match self.api.list_clusters(workspace).await {
                Ok(clusters) => clusters,
                Err(e) => {
                    debug!(workspace = %workspace, error = %e, "Skipping workspace");
                    continue;
                }
            };
            for cluster in clusters {
                if labels_match(selector, |k| cluster.labels.get(k).map(String::as_str))
                    && seen.insert(cluster.name.clone())
                {
                    matched.push(TargetId::new(cluster.name));
                }
            }
        }

        info!(count = matched.len(), "Found clusters matching selector");
        Ok(matched)
    }
}

/// Resolves selectors against Rancher-managed clusters
pub struct RancherTargetResolver {
    api: Arc<dyn RancherApi>,
}

impl RancherTargetResolver {
    /// Create a resolver
    pub fn new(api: Arc<dyn RancherApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl TargetResolver for RancherTargetResolver {
    async fn resolve(&self, spec: &TargetSpec) -> Result<Vec<TargetId>, TargetResolutionError> {
        let selector: &BTreeMap<String, String> = match spec {
            TargetSpec::Explicit(ids) => return Ok(explicit(ids)),
            TargetSpec::Selector(selector) => selector,
        };

        let matched: Vec<TargetId> = self
            .api
            .list_clusters()
            .await?
            .into_iter()
            .filter(|c| labels_match(selector, |k| c.labels.get(k).map(String::as_str)))
            .map(|c| TargetId::new(c.id))
            .collect();

        if matched.is_empty() {
            warn!(selector = ?selector, "No clusters matched selector");
        }
        Ok(matched)
    }
}

/// Fixed cluster inventory, for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticTargetResolver {
    clusters: Vec<(TargetId, BTreeMap<String, String>)>,
}

impl StaticTargetResolver {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cluster with labels
    pub fn with_cluster(mut self, id: &str, labels: &[(&str, &str)]) -> Self {
        self.clusters.push((
            TargetId::new(id),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        self
    }
}

#[async_trait]
impl TargetResolver for StaticTargetResolver {
    async fn resolve(&self, spec: &TargetSpec) -> Result<Vec<TargetId>, TargetResolutionError> {
        Ok(match spec {
            TargetSpec::Explicit(ids) => explicit(ids),
            TargetSpec::Selector(selector) => self
                .clusters
                .iter()
                .filter(|(_, labels)| labels_match(selector, |k| labels.get(k).map(String::as_str)))
                .map(|(id, _)| id.clone())
                .collect(),
        })
    }
}
