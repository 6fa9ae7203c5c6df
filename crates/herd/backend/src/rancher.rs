//! Rancher API surface used by the app backend and the cluster resolver

use crate::error::ApiError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A cluster known to Rancher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RancherCluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A Helm app installed through the Rancher Apps API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub namespace: String,
    pub spec: AppSpec,
    #[serde(default)]
    pub status: Option<AppStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub chart: AppChart,
    pub create_namespace: bool,
    pub wait: bool,
    pub timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppChart {
    pub chart_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    /// `deployed`, `pending-install`, `failed`, `error`, ...
    pub state: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Rancher management API operations
#[async_trait]
pub trait RancherApi: Send + Sync {
    async fn list_clusters(&self) -> Result<Vec<RancherCluster>, ApiError>;

    async fn list_apps(&self, cluster_id: &str, namespace: &str) -> Result<Vec<App>, ApiError>;

    async fn create_app(&self, cluster_id: &str, app: &App) -> Result<(), ApiError>;

    async fn update_app(&self, cluster_id: &str, app: &App) -> Result<(), ApiError>;

    async fn delete_app(&self, cluster_id: &str, namespace: &str, name: &str)
        -> Result<(), ApiError>;

    /// Find an app by name within a namespace
    async fn get_app(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<App>, ApiError> {
        Ok(self
            .list_apps(cluster_id, namespace)
            .await?
            .into_iter()
            .find(|app| app.name == name))
    }
}

type AppKey = (String, String, String);

/// In-memory Rancher for development and testing
#[derive(Clone, Default)]
pub struct InMemoryRancherApi {
    clusters: Arc<DashMap<String, RancherCluster>>,
    apps: Arc<DashMap<AppKey, App>>,
    cluster_failures: Arc<DashMap<String, ApiError>>,
    list_failure: Arc<Mutex<Option<ApiError>>>,
    deletes: Arc<Mutex<Vec<(String, String, String)>>>,
    auto_ready: bool,
}

impl InMemoryRancherApi {
    /// Create an empty API
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every written app as `deployed` immediately
    pub fn with_auto_ready(mut self) -> Self {
        self.auto_ready = true;
        self
    }

    /// Register a cluster with labels
    pub fn add_cluster(&self, id: &str, name: &str, labels: &[(&str, &str)]) {
        self.clusters.insert(
            id.to_string(),
            RancherCluster {
                id: id.to_string(),
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        );
    }

    /// Make every app operation against `cluster_id` fail with `error`
    pub fn fail_cluster(&self, cluster_id: &str, error: ApiError) {
        self.cluster_failures.insert(cluster_id.to_string(), error);
    }

    /// Make cluster listing fail with `error`
    pub fn fail_listing(&self, error: ApiError) {
        if let Ok(mut failure) = self.list_failure.lock() {
            *failure = Some(error);
        }
    }

    /// Get a stored app
    pub fn app(&self, cluster_id: &str, namespace: &str, name: &str) -> Option<App> {
        self.apps
            .get(&key(cluster_id, namespace, name))
            .map(|a| a.clone())
    }

    /// Number of stored apps across clusters
    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    /// Override the reported state of an app
    pub fn set_state(&self, cluster_id: &str, namespace: &str, name: &str, state: &str) {
        if let Some(mut app) = self.apps.get_mut(&key(cluster_id, namespace, name)) {
            app.status = Some(AppStatus {
                state: state.to_string(),
                message: None,
            });
        }
    }

    /// Every delete call received, as `(cluster, namespace, name)`, in order
    pub fn delete_calls(&self) -> Vec<(String, String, String)> {
        self.deletes.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn check_cluster(&self, cluster_id: &str) -> Result<(), ApiError> {
        match self.cluster_failures.get(cluster_id) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn stored(&self, app: &App, previous: Option<AppStatus>) -> App {
        let mut stored = app.clone();
        stored.status = if self.auto_ready {
            Some(AppStatus {
                state: "deployed".to_string(),
                message: None,
            })
        } else {
            previous.or(Some(AppStatus {
                state: "pending-install".to_string(),
                message: None,
            }))
        };
        stored
    }
}

fn key(cluster_id: &str, namespace: &str, name: &str) -> AppKey {
    (
        cluster_id.to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

#[async_trait]
impl RancherApi for InMemoryRancherApi {
    async fn list_clusters(&self) -> Result<Vec<RancherCluster>, ApiError> {
        if let Some(error) = self.list_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        let mut clusters: Vec<RancherCluster> =
            self.clusters.iter().map(|c| c.value().clone()).collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clusters)
    }

    async fn list_apps(&self, cluster_id: &str, namespace: &str) -> Result<Vec<App>, ApiError> {
        self.check_cluster(cluster_id)?;
        Ok(self
            .apps
            .iter()
            .filter(|entry| entry.key().0 == cluster_id && entry.key().1 == namespace)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_app(&self, cluster_id: &str, app: &App) -> Result<(), ApiError> {
        self.check_cluster(cluster_id)?;
        let key = key(cluster_id, &app.namespace, &app.name);
        if self.apps.contains_key(&key) {
            return Err(ApiError::Conflict(format!(
                "apps/{}/{} already exists in {cluster_id}",
                app.namespace, app.name
            )));
        }
        let stored = self.stored(app, None);
        self.apps.insert(key, stored);
        Ok(())
    }

    async fn update_app(&self, cluster_id: &str, app: &App) -> Result<(), ApiError> {
        self.check_cluster(cluster_id)?;
        let key = key(cluster_id, &app.namespace, &app.name);
        let previous = match self.apps.get(&key) {
            Some(existing) => existing.status.clone(),
            None => {
                return Err(ApiError::NotFound(format!(
                    "apps/{}/{} in {cluster_id}",
                    app.namespace, app.name
                )))
            }
        };
        let stored = self.stored(app, previous);
        self.apps.insert(key, stored);
        Ok(())
    }

    async fn delete_app(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        let key = key(cluster_id, namespace, name);
        if let Ok(mut deletes) = self.deletes.lock() {
            deletes.push(key.clone());
        }
        self.check_cluster(cluster_id)?;
        self.apps
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("apps/{namespace}/{name} in {cluster_id}")))
    }
}
