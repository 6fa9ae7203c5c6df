//! Deployment records: the observed outcome of one item on one target

use crate::ids::TargetId;
use crate::unit::{StepType, UnitKind, WorkItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status of a single (item, target) deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Pending,
    Deploying,
    Deployed,
    Failed,
}

impl RecordStatus {
    /// Label as shown in the owning resource's status
    pub fn label(&self, kind: UnitKind) -> &'static str {
        match (self, kind) {
            (RecordStatus::Pending, _) => "Pending",
            (RecordStatus::Deploying, UnitKind::Stack) => "Deploying",
            (RecordStatus::Deploying, UnitKind::Pipeline) => "Running",
            (RecordStatus::Deployed, UnitKind::Stack) => "Deployed",
            (RecordStatus::Deployed, UnitKind::Pipeline) => "Completed",
            (RecordStatus::Failed, _) => "Failed",
        }
    }
}

/// Outcome of applying one work item to one target.
///
/// Keyed by `(item_name, target_id)`. Grouped backends that deploy to
/// several targets in one call use a comma-joined target id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub item_name: String,
    pub target_id: TargetId,
    pub release_name: String,
    pub namespace: String,
    pub version: String,

    /// Set for pipeline steps
    pub step_type: Option<StepType>,

    pub status: RecordStatus,
    pub message: Option<String>,
    pub last_updated: DateTime<Utc>,

    /// Retries are not scheduled by the engine; always zero
    pub retry_count: u32,

    /// Wall-clock time spent on the item
    pub execution_time: Option<Duration>,
}

impl DeploymentRecord {
    /// Create a record for `item` on `target_id`
    pub fn new(
        item: &WorkItem,
        target_id: TargetId,
        unit_namespace: &str,
        status: RecordStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_name: item.name.clone(),
            target_id,
            release_name: item.release_name().to_string(),
            namespace: item.target_namespace(unit_namespace).to_string(),
            version: item.version().to_string(),
            step_type: item.step_type(),
            status,
            message: Some(message.into()),
            last_updated: Utc::now(),
            retry_count: 0,
            execution_time: None,
        }
    }

    /// Shorthand for a record describing a failed call
    pub fn failed(
        item: &WorkItem,
        target_id: TargetId,
        unit_namespace: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(item, target_id, unit_namespace, RecordStatus::Failed, message)
    }

    /// Record key: item name and target
    pub fn key(&self) -> (&str, &TargetId) {
        (&self.item_name, &self.target_id)
    }

    /// Update status and message in place
    pub fn mark(&mut self, status: RecordStatus, message: impl Into<String>) {
        self.status = status;
        self.message = Some(message.into());
        self.last_updated = Utc::now();
    }

    /// Whether the record is failed
    pub fn is_failed(&self) -> bool {
        self.status == RecordStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ChartRef;

    #[test]
    fn test_record_from_chart_item() {
        let item = WorkItem::chart(
            "postgres",
            ChartRef::new("postgres", "repo", "12.1.0", "data").with_release_name("db"),
        );
        let record = DeploymentRecord::new(
            &item,
            TargetId::new("c-1"),
            "team-a",
            RecordStatus::Deploying,
            "applied",
        );

        assert_eq!(record.key(), ("postgres", &TargetId::new("c-1")));
        assert_eq!(record.release_name, "db");
        assert_eq!(record.namespace, "data");
        assert_eq!(record.version, "12.1.0");
        assert_eq!(record.step_type, None);
    }

    #[test]
    fn test_mark_updates_in_place() {
        let item = WorkItem::step("ingest", StepType::Ingestion);
        let mut record = DeploymentRecord::new(
            &item,
            TargetId::new("local"),
            "pipelines",
            RecordStatus::Deploying,
            "applied",
        );
        let before = record.last_updated;

        record.mark(RecordStatus::Failed, "timed out");

        assert!(record.is_failed());
        assert_eq!(record.message.as_deref(), Some("timed out"));
        assert!(record.last_updated >= before);
        assert_eq!(record.namespace, "pipelines");
    }

    #[test]
    fn test_labels_per_kind() {
        assert_eq!(RecordStatus::Deploying.label(UnitKind::Stack), "Deploying");
        assert_eq!(RecordStatus::Deploying.label(UnitKind::Pipeline), "Running");
        assert_eq!(RecordStatus::Deployed.label(UnitKind::Pipeline), "Completed");
    }
}
