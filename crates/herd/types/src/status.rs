//! Aggregate status reported back to the owning resource

use crate::ids::TargetId;
use crate::record::DeploymentRecord;
use crate::unit::UnitKind;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Phase of a unit.
///
/// Within one pass phases only move forward:
/// `Pending -> Deploying -> {Deployed | Failed}`. `Deleting` is entered only
/// by teardown and may follow any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Deploying,
    Deployed,
    Failed,
    Deleting,
}

impl Phase {
    /// Label shown for this phase
    pub fn label(&self, kind: UnitKind) -> &'static str {
        match (self, kind) {
            (Phase::Pending, _) => "Pending",
            (Phase::Deploying, UnitKind::Stack) => "Deploying",
            (Phase::Deploying, UnitKind::Pipeline) => "Running",
            (Phase::Deployed, UnitKind::Stack) => "Deployed",
            (Phase::Deployed, UnitKind::Pipeline) => "Completed",
            (Phase::Failed, _) => "Failed",
            (Phase::Deleting, _) => "Deleting",
        }
    }

    /// Whether a pass ends in this phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Deployed | Phase::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Phase::Pending => 0,
            Phase::Deploying => 1,
            Phase::Deployed | Phase::Failed => 2,
            Phase::Deleting => 3,
        }
    }

    /// Whether `next` is a legal move from `self` within one pass
    pub fn can_advance_to(&self, next: Phase) -> bool {
        if next == Phase::Deleting || next == *self {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// A Kubernetes-style status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: String,
}

/// Running status of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusAggregate {
    pub kind: UnitKind,
    pub phase: Phase,
    pub message: String,
    pub target_clusters: Vec<TargetId>,
    /// Records in application order, unique per (item, target)
    pub records: Vec<DeploymentRecord>,
    pub observed_generation: Option<i64>,
    pub last_reconcile_time: DateTime<Utc>,
}

impl StatusAggregate {
    /// Create an empty aggregate in `Pending`
    pub fn new(kind: UnitKind, observed_generation: Option<i64>) -> Self {
        Self {
            kind,
            phase: Phase::Pending,
            message: String::new(),
            target_clusters: Vec::new(),
            records: Vec::new(),
            observed_generation,
            last_reconcile_time: Utc::now(),
        }
    }

    /// Move to `phase`, refusing regressions.
    ///
    /// Returns false (and leaves the aggregate untouched) when the move would
    /// go backwards within the pass.
    pub fn advance(&mut self, phase: Phase, message: impl Into<String>) -> bool {
        if !self.phase.can_advance_to(phase) {
            warn!(
                from = ?self.phase,
                to = ?phase,
                "Ignoring phase regression"
            );
            return false;
        }
        self.phase = phase;
        self.message = message.into();
        self.last_reconcile_time = Utc::now();
        true
    }

    /// Insert a record, replacing any earlier record with the same key
    pub fn upsert_record(&mut self, record: DeploymentRecord) {
        match self.records.iter_mut().find(|r| r.key() == record.key()) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        self.last_reconcile_time = Utc::now();
    }

    /// Number of failed records
    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }

    /// Ready condition derived from the phase
    pub fn ready_condition(&self) -> Condition {
        let (status, reason) = match (self.phase, self.kind) {
            (Phase::Deployed, UnitKind::Stack) => ("True", "DeploymentSucceeded"),
            (Phase::Deployed, UnitKind::Pipeline) => ("True", "ExecutionSucceeded"),
            (Phase::Failed, UnitKind::Stack) => ("False", "DeploymentFailed"),
            (Phase::Failed, UnitKind::Pipeline) => ("False", "ExecutionFailed"),
            (_, UnitKind::Stack) => ("False", "DeploymentInProgress"),
            (_, UnitKind::Pipeline) => ("False", "ExecutionInProgress"),
        };

        Condition {
            condition_type: "Ready".to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(self.message.clone()),
            last_transition_time: timestamp(&self.last_reconcile_time),
        }
    }

    /// Render the CRD status document for this aggregate
    pub fn to_view(&self) -> StatusView {
        let (deployments, step_status) = match self.kind {
            UnitKind::Stack => (
                Some(self.records.iter().map(|r| self.chart_view(r)).collect()),
                None,
            ),
            UnitKind::Pipeline => (
                None,
                Some(self.records.iter().map(|r| self.step_view(r)).collect()),
            ),
        };

        StatusView {
            phase: self.phase.label(self.kind).to_string(),
            message: self.message.clone(),
            observed_generation: self.observed_generation,
            conditions: vec![self.ready_condition()],
            target_clusters: self
                .target_clusters
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            deployments,
            step_status,
            last_reconcile_time: timestamp(&self.last_reconcile_time),
        }
    }

    fn chart_view(&self, record: &DeploymentRecord) -> ChartDeploymentView {
        ChartDeploymentView {
            chart_name: record.item_name.clone(),
            cluster_id: record.target_id.as_str().to_string(),
            release_name: record.release_name.clone(),
            namespace: record.namespace.clone(),
            version: record.version.clone(),
            status: record.status.label(self.kind).to_string(),
            message: record.message.clone(),
            last_updated: timestamp(&record.last_updated),
        }
    }

    fn step_view(&self, record: &DeploymentRecord) -> StepStatusView {
        StepStatusView {
            step_name: record.item_name.clone(),
            step_type: record
                .step_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            phase: record.status.label(self.kind).to_string(),
            message: record.message.clone(),
            last_updated: timestamp(&record.last_updated),
            retry_count: record.retry_count,
            execution_time: record
                .execution_time
                .map(|d| format!("{:.3}s", d.as_secs_f64())),
        }
    }
}

/// Serializable status document (`status` subresource of Stack / Pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub phase: String,
    pub message: String,
    pub observed_generation: Option<i64>,
    pub conditions: Vec<Condition>,
    pub target_clusters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<Vec<ChartDeploymentView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_status: Option<Vec<StepStatusView>>,
    pub last_reconcile_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDeploymentView {
    pub chart_name: String,
    pub cluster_id: String,
    pub release_name: String,
    pub namespace: String,
    pub version: String,
    pub status: String,
    pub message: Option<String>,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatusView {
    pub step_name: String,
    pub step_type: String,
    pub phase: String,
    pub message: Option<String>,
    pub last_updated: String,
    pub retry_count: u32,
    pub execution_time: Option<String>,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordStatus;
    use crate::unit::{ChartRef, StepType, WorkItem};

    fn record(item: &str, target: &str, status: RecordStatus) -> DeploymentRecord {
        let item = WorkItem::chart(item, ChartRef::new(item, "repo", "1.0.0", "apps"));
        DeploymentRecord::new(&item, TargetId::new(target), "default", status, "m")
    }

    #[test]
    fn test_phase_transitions_are_monotonic() {
        assert!(Phase::Pending.can_advance_to(Phase::Deploying));
        assert!(Phase::Pending.can_advance_to(Phase::Deployed));
        assert!(Phase::Deploying.can_advance_to(Phase::Failed));
        assert!(Phase::Deploying.can_advance_to(Phase::Deploying));
        assert!(!Phase::Deploying.can_advance_to(Phase::Pending));
        assert!(!Phase::Deployed.can_advance_to(Phase::Failed));
        assert!(!Phase::Failed.can_advance_to(Phase::Deploying));
        assert!(Phase::Deployed.can_advance_to(Phase::Deleting));
    }

    #[test]
    fn test_advance_refuses_regression() {
        let mut status = StatusAggregate::new(UnitKind::Stack, None);
        assert!(status.advance(Phase::Deploying, "deploying"));
        assert!(status.advance(Phase::Failed, "1 failed"));
        assert!(!status.advance(Phase::Deploying, "again"));
        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.message, "1 failed");
    }

    #[test]
    fn test_upsert_replaces_same_key() {
        let mut status = StatusAggregate::new(UnitKind::Stack, None);
        status.upsert_record(record("db", "c-1", RecordStatus::Deploying));
        status.upsert_record(record("db", "c-2", RecordStatus::Deploying));
        status.upsert_record(record("db", "c-1", RecordStatus::Failed));

        assert_eq!(status.records.len(), 2);
        assert_eq!(status.records[0].status, RecordStatus::Failed);
        assert_eq!(status.failed_count(), 1);
    }

    #[test]
    fn test_stack_view() {
        let mut status = StatusAggregate::new(UnitKind::Stack, Some(3));
        status.target_clusters = vec![TargetId::new("c-1")];
        status.upsert_record(record("db", "c-1", RecordStatus::Deployed));
        status.advance(Phase::Deployed, "All charts deployed successfully");

        let view = serde_json::to_value(status.to_view()).unwrap();
        assert_eq!(view["phase"], "Deployed");
        assert_eq!(view["observedGeneration"], 3);
        assert_eq!(view["targetClusters"][0], "c-1");
        assert_eq!(view["deployments"][0]["chartName"], "db");
        assert_eq!(view["deployments"][0]["clusterId"], "c-1");
        assert!(view.get("stepStatus").is_none());
        assert_eq!(view["conditions"][0]["type"], "Ready");
        assert_eq!(view["conditions"][0]["status"], "True");
        assert_eq!(view["conditions"][0]["reason"], "DeploymentSucceeded");
        assert!(view["lastReconcileTime"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_pipeline_view() {
        let mut status = StatusAggregate::new(UnitKind::Pipeline, None);
        let step = WorkItem::step("ingest", StepType::Ingestion);
        let mut rec = DeploymentRecord::new(
            &step,
            TargetId::new("local"),
            "default",
            RecordStatus::Deploying,
            "applied",
        );
        rec.execution_time = Some(std::time::Duration::from_millis(1500));
        status.upsert_record(rec);
        status.advance(Phase::Deploying, "Executed step ingest");

        let view = serde_json::to_value(status.to_view()).unwrap();
        assert_eq!(view["phase"], "Running");
        assert_eq!(view["stepStatus"][0]["stepType"], "ingestion");
        assert_eq!(view["stepStatus"][0]["phase"], "Running");
        assert_eq!(view["stepStatus"][0]["executionTime"], "1.500s");
        assert_eq!(view["conditions"][0]["reason"], "ExecutionInProgress");
        assert!(view.get("deployments").is_none());
    }
}
