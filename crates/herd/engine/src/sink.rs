//! Status reporting side channel
//!
//! Reports are best effort: a sink that fails logs the failure and drops the
//! report. Nothing is retried and the reconciliation outcome never depends on
//! a report landing.

use async_trait::async_trait;
use dashmap::DashMap;
use herd_types::{DeploymentUnit, StatusAggregate, StatusView, UnitKind};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Identifies the resource whose status is being reported
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitRef {
    pub kind: UnitKind,
    pub namespace: String,
    pub name: String,
}

impl UnitRef {
    /// Create a reference from its parts
    pub fn new(kind: UnitKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Reference to `unit`
    pub fn of(unit: &DeploymentUnit) -> Self {
        Self::new(unit.kind, unit.namespace.clone(), unit.name.clone())
    }
}

impl std::fmt::Display for UnitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Receives progressive status for a unit.
///
/// Implementations must not propagate failures; log and return.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(&self, unit: &UnitRef, status: &StatusAggregate);
}

/// Keeps every report, for tests and simulations
#[derive(Clone, Default)]
pub struct InMemoryStatusSink {
    history: Arc<DashMap<UnitRef, Vec<StatusAggregate>>>,
    order: Arc<Mutex<Vec<UnitRef>>>,
}

impl InMemoryStatusSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report for `unit`, oldest first
    pub fn history(&self, unit: &UnitRef) -> Vec<StatusAggregate> {
        self.history
            .get(unit)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Most recent status reported for `unit`
    pub fn latest(&self, unit: &UnitRef) -> Option<StatusAggregate> {
        self.history.get(unit).and_then(|h| h.last().cloned())
    }

    /// Most recent status rendered as a view
    pub fn latest_view(&self, unit: &UnitRef) -> Option<StatusView> {
        self.latest(unit).map(|s| s.to_view())
    }

    /// Units in the order they first reported
    pub fn units(&self) -> Vec<UnitRef> {
        self.order.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Forget every report
    pub fn clear(&self) {
        self.history.clear();
        if let Ok(mut order) = self.order.lock() {
            order.clear();
        }
    }
}

#[async_trait]
impl StatusSink for InMemoryStatusSink {
    async fn report(&self, unit: &UnitRef, status: &StatusAggregate) {
        let mut entry = self.history.entry(unit.clone()).or_default();
        if entry.is_empty() {
            if let Ok(mut order) = self.order.lock() {
                order.push(unit.clone());
            }
        }
        entry.push(status.clone());
    }
}

/// Logs every report as a rendered status document
#[derive(Debug, Clone, Default)]
pub struct TracingStatusSink;

#[async_trait]
impl StatusSink for TracingStatusSink {
    async fn report(&self, unit: &UnitRef, status: &StatusAggregate) {
        let view = status.to_view();
        info!(
            unit = %unit,
            phase = %view.phase,
            records = status.records.len(),
            message = %view.message,
            "Status update"
        );
        match serde_json::to_string(&view) {
            Ok(json) => debug!(unit = %unit, status = %json, "Rendered status"),
            Err(e) => debug!(unit = %unit, error = %e, "Could not render status"),
        }
    }
}
