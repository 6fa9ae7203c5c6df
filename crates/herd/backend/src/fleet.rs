//! Fleet API surface used by the bundle backend

use crate::error::ApiError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A Fleet Bundle (`fleet.cattle.io/v1alpha1`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub name: String,
    /// Fleet workspace holding the bundle
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub spec: BundleSpec,
    #[serde(default)]
    pub status: Option<BundleStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    pub default_namespace: String,
    pub helm: HelmOptions,
    pub targets: Vec<BundleTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmOptions {
    pub chart: String,
    pub repo: String,
    pub version: String,
    pub release_name: String,
    pub values: Map<String, Value>,
    pub atomic: bool,
    pub wait: bool,
    pub timeout: String,
    pub create_namespace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleStatus {
    pub conditions: Vec<ApiCondition>,
}

/// A condition as reported by a cluster API object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiCondition {
    /// Create a condition without a reason
    pub fn new(condition_type: &str, status: &str) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            reason: None,
            message: None,
        }
    }

    /// Attach a reason
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Whether this condition has the given type and status
    pub fn is(&self, condition_type: &str, status: &str) -> bool {
        self.condition_type == condition_type && self.status == status
    }
}

/// A downstream cluster registered with Fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetCluster {
    pub name: String,
    pub workspace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Registration record linking a cluster to a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRegistration {
    pub name: String,
    pub workspace: String,
    /// `status.clusterName`, set once registration completes
    #[serde(default)]
    pub cluster_name: Option<String>,
}

/// Fleet custom resources needed by the bundle backend
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn get_bundle(&self, workspace: &str, name: &str) -> Result<Bundle, ApiError>;

    async fn create_bundle(&self, bundle: &Bundle) -> Result<(), ApiError>;

    /// Replace the spec and labels of an existing bundle
    async fn update_bundle(&self, bundle: &Bundle) -> Result<(), ApiError>;

    async fn delete_bundle(&self, workspace: &str, name: &str) -> Result<(), ApiError>;

    async fn list_clusters(&self, workspace: &str) -> Result<Vec<FleetCluster>, ApiError>;

    async fn list_cluster_registrations(
        &self,
        workspace: &str,
    ) -> Result<Vec<ClusterRegistration>, ApiError>;
}

type BundleKey = (String, String);

/// In-memory Fleet for development and testing.
///
/// Supports failure injection per bundle and per workspace, and can mark
/// every created or updated bundle ready immediately.
#[derive(Clone, Default)]
pub struct InMemoryFleetApi {
    bundles: Arc<DashMap<BundleKey, Bundle>>,
    clusters: Arc<DashMap<String, Vec<FleetCluster>>>,
    registrations: Arc<DashMap<String, Vec<ClusterRegistration>>>,
    bundle_failures: Arc<DashMap<String, ApiError>>,
    workspace_failures: Arc<DashMap<String, ApiError>>,
    deletes: Arc<Mutex<Vec<BundleKey>>>,
    auto_ready: bool,
}

impl InMemoryFleetApi {
    /// Create an empty API
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark bundles `Ready=True` as soon as they are written
    pub fn with_auto_ready(mut self) -> Self {
        self.auto_ready = true;
        self
    }

    /// Register a cluster in a workspace, with a completed registration
    pub fn add_cluster(&self, workspace: &str, name: &str, labels: &[(&str, &str)]) {
        self.clusters
            .entry(workspace.to_string())
            .or_default()
            .push(FleetCluster {
                name: name.to_string(),
                workspace: workspace.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        self.registrations
            .entry(workspace.to_string())
            .or_default()
            .push(ClusterRegistration {
                name: format!("request-{name}"),
                workspace: workspace.to_string(),
                cluster_name: Some(name.to_string()),
            });
    }

    /// Make every write to the named bundle fail with `error`
    pub fn fail_bundle(&self, name: &str, error: ApiError) {
        self.bundle_failures.insert(name.to_string(), error);
    }

    /// Make every operation against `workspace` fail with `error`
    pub fn fail_workspace(&self, workspace: &str, error: ApiError) {
        self.workspace_failures.insert(workspace.to_string(), error);
    }

    /// Drop every injected failure
    pub fn clear_failures(&self) {
        self.bundle_failures.clear();
        self.workspace_failures.clear();
    }

    /// Get a stored bundle
    pub fn bundle(&self, workspace: &str, name: &str) -> Option<Bundle> {
        self.bundles
            .get(&(workspace.to_string(), name.to_string()))
            .map(|b| b.clone())
    }

    /// Number of stored bundles across workspaces
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    /// Replace the status conditions of a stored bundle
    pub fn set_conditions(&self, workspace: &str, name: &str, conditions: Vec<ApiCondition>) {
        if let Some(mut bundle) = self
            .bundles
            .get_mut(&(workspace.to_string(), name.to_string()))
        {
            bundle.status = Some(BundleStatus { conditions });
        }
    }

    /// Every delete call received, as `(workspace, name)`, in order
    pub fn delete_calls(&self) -> Vec<(String, String)> {
        self.deletes.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn check_workspace(&self, workspace: &str) -> Result<(), ApiError> {
        match self.workspace_failures.get(workspace) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn check_bundle(&self, bundle: &Bundle) -> Result<(), ApiError> {
        self.check_workspace(&bundle.namespace)?;
        match self.bundle_failures.get(&bundle.name) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn stored(&self, bundle: &Bundle, previous: Option<BundleStatus>) -> Bundle {
        let mut stored = bundle.clone();
        stored.status = if self.auto_ready {
            Some(BundleStatus {
                conditions: vec![ApiCondition::new("Ready", "True")],
            })
        } else {
            previous
        };
        stored
    }
}

#[async_trait]
impl FleetApi for InMemoryFleetApi {
    async fn get_bundle(&self, workspace: &str, name: &str) -> Result<Bundle, ApiError> {
        self.check_workspace(workspace)?;
        self.bundle(workspace, name)
            .ok_or_else(|| ApiError::NotFound(format!("bundles/{workspace}/{name}")))
    }

    async fn create_bundle(&self, bundle: &Bundle) -> Result<(), ApiError> {
        self.check_bundle(bundle)?;
        let key = (bundle.namespace.clone(), bundle.name.clone());
        if self.bundles.contains_key(&key) {
            return Err(ApiError::Conflict(format!(
                "bundles/{}/{} already exists",
                key.0, key.1
            )));
        }
        let stored = self.stored(bundle, None);
        self.bundles.insert(key, stored);
        Ok(())
    }

    async fn update_bundle(&self, bundle: &Bundle) -> Result<(), ApiError> {
        self.check_bundle(bundle)?;
        let key = (bundle.namespace.clone(), bundle.name.clone());
        let previous = match self.bundles.get(&key) {
            Some(existing) => existing.status.clone(),
            None => {
                return Err(ApiError::NotFound(format!(
                    "bundles/{}/{}",
                    key.0, key.1
                )))
            }
        };
        let stored = self.stored(bundle, previous);
        self.bundles.insert(key, stored);
        Ok(())
    }

    async fn delete_bundle(&self, workspace: &str, name: &str) -> Result<(), ApiError> {
        let key = (workspace.to_string(), name.to_string());
        if let Ok(mut deletes) = self.deletes.lock() {
            deletes.push(key.clone());
        }
        self.check_workspace(workspace)?;
        self.bundles
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("bundles/{workspace}/{name}")))
    }

    async fn list_clusters(&self, workspace: &str) -> Result<Vec<FleetCluster>, ApiError> {
        self.check_workspace(workspace)?;
        Ok(self
            .clusters
            .get(workspace)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn list_cluster_registrations(
        &self,
        workspace: &str,
    ) -> Result<Vec<ClusterRegistration>, ApiError> {
        self.check_workspace(workspace)?;
        Ok(self
            .registrations
            .get(workspace)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}
