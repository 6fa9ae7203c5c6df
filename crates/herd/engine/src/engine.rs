//! Reconciliation engine
//!
//! One apply pass resolves targets, orders items, and deploys them one at a
//! time, reporting the running aggregate after every item. One teardown pass
//! deletes items in reverse order and never fails.

use crate::error::ReconcileError;
use crate::resolver::order;
use crate::sink::{StatusSink, UnitRef};
use crate::target::TargetResolver;
use herd_backend::{DeployContext, DeploymentBackend, FanOut};
use herd_types::{
    format_timeout, DeploymentRecord, DeploymentUnit, PassId, Phase, RecordStatus,
    StatusAggregate, TargetId, UnitKind, WorkItem,
};
use herd_values::ValuesMerger;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Message used when a pass stops because its unit is being deleted
pub const CANCELLED_MESSAGE: &str = "reconciliation cancelled";

/// Result of one apply pass
#[derive(Debug)]
pub struct PassOutcome {
    pub pass_id: PassId,
    pub status: StatusAggregate,
    /// Set when the pass was aborted by a permanent error
    pub error: Option<ReconcileError>,
}

impl PassOutcome {
    /// Whether every item deployed
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.phase == Phase::Deployed
    }
}

/// Result of one teardown pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownOutcome {
    /// Delete calls issued
    pub attempted: usize,
    /// Delete calls that returned an error (logged and swallowed)
    pub failed: usize,
}

/// Drives apply and teardown passes for deployment units
pub struct ReconciliationEngine {
    targets: Arc<dyn TargetResolver>,
    merger: ValuesMerger,
    backend: Arc<dyn DeploymentBackend>,
    sink: Arc<dyn StatusSink>,
}

impl ReconciliationEngine {
    /// Create an engine
    pub fn new(
        targets: Arc<dyn TargetResolver>,
        merger: ValuesMerger,
        backend: Arc<dyn DeploymentBackend>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            targets,
            merger,
            backend,
            sink,
        }
    }

    /// The deployment backend
    pub fn backend(&self) -> &Arc<dyn DeploymentBackend> {
        &self.backend
    }

    /// The status sink
    pub fn sink(&self) -> &Arc<dyn StatusSink> {
        &self.sink
    }

    /// Report a status outside of a pass (e.g. the initial `Pending`)
    pub async fn report(&self, unit: &DeploymentUnit, status: &StatusAggregate) {
        self.sink.report(&UnitRef::of(unit), status).await;
    }

    /// Run one apply pass.
    ///
    /// Only validation failures and dependency cycles abort the pass; every
    /// other failure is captured in a record and the pass continues.
    #[instrument(
        skip(self, unit, cancel),
        fields(unit = %UnitRef::of(unit), backend = self.backend.name())
    )]
    pub async fn apply(&self, unit: &DeploymentUnit, cancel: &CancellationToken) -> PassOutcome {
        let pass_id = PassId::generate();
        let unit_ref = UnitRef::of(unit);
        let mut status = StatusAggregate::new(unit.kind, unit.generation);
        info!(pass_id = %pass_id, items = unit.items.len(), "Starting apply pass");

        if let Err(e) = unit.validate() {
            error!(pass_id = %pass_id, error = %e, "Unit failed validation");
            status.advance(Phase::Failed, e.to_string());
            self.sink.report(&unit_ref, &status).await;
            return PassOutcome {
                pass_id,
                status,
                error: Some(e.into()),
            };
        }

        let targets = self.resolve_targets(unit).await;
        if targets.is_empty() {
            info!(pass_id = %pass_id, "No target clusters found, nothing to do");
            status.advance(Phase::Deployed, "No target clusters found");
            self.sink.report(&unit_ref, &status).await;
            return PassOutcome {
                pass_id,
                status,
                error: None,
            };
        }

        status.target_clusters = targets.clone();
        status.advance(Phase::Deploying, starting_message(unit.kind, targets.len()));
        self.sink.report(&unit_ref, &status).await;

        let ordered = match order(&unit.items) {
            Ok(ordered) => ordered,
            Err(e) => {
                error!(pass_id = %pass_id, error = %e, "Cannot order items");
                status.advance(Phase::Failed, e.to_string());
                self.sink.report(&unit_ref, &status).await;
                return PassOutcome {
                    pass_id,
                    status,
                    error: Some(e.into()),
                };
            }
        };

        let ctx = DeployContext::for_unit(unit);
        for item in &ordered {
            if cancel.is_cancelled() {
                break;
            }

            info!(pass_id = %pass_id, item = %item.name, "Applying item");
            for record in self.apply_item(&ctx, unit, item, &targets, cancel).await {
                status.upsert_record(record);
            }
            if cancel.is_cancelled() {
                break;
            }
            status.advance(Phase::Deploying, progress_message(unit.kind, item, targets.len()));
            self.sink.report(&unit_ref, &status).await;
        }

        if cancel.is_cancelled() {
            warn!(pass_id = %pass_id, "Pass cancelled");
            status.advance(Phase::Failed, CANCELLED_MESSAGE);
        } else {
            let failed = status.failed_count();
            if failed > 0 {
                warn!(pass_id = %pass_id, failed, "Pass finished with failures");
                status.advance(Phase::Failed, failure_message(unit.kind, failed));
            } else {
                info!(pass_id = %pass_id, "Pass finished");
                status.advance(Phase::Deployed, success_message(unit.kind));
            }
        }
        self.sink.report(&unit_ref, &status).await;

        PassOutcome {
            pass_id,
            status,
            error: None,
        }
    }

    /// Delete every item in reverse dependency order.
    ///
    /// Grouped backends get one delete per item even when no targets
    /// resolve. Deletion errors are logged and counted, never returned.
    #[instrument(
        skip(self, unit),
        fields(unit = %UnitRef::of(unit), backend = self.backend.name())
    )]
    pub async fn teardown(&self, unit: &DeploymentUnit) -> TeardownOutcome {
        let targets = self.resolve_targets(unit).await;
        let mut outcome = TeardownOutcome::default();
        if targets.is_empty() {
            // Grouped resources are found by name, not by target
            info!("No target clusters found, deleting by name only");
        }

        let mut ordered = match order(&unit.items) {
            Ok(ordered) => ordered,
            Err(e) => {
                warn!(error = %e, "Cannot order items, deleting in listed order reversed");
                unit.items.clone()
            }
        };
        ordered.reverse();

        let ctx = DeployContext::for_unit(unit);
        for item in &ordered {
            let groups: Vec<&[TargetId]> = match self.backend.fan_out() {
                FanOut::Grouped => vec![&targets[..]],
                FanOut::PerTarget => targets.chunks(1).collect(),
            };
            for group in groups {
                outcome.attempted += 1;
                match self.backend.delete(&ctx, item, group).await {
                    Ok(()) => {
                        debug!(item = %item.name, targets = %TargetId::joined(group), "Deleted")
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        error!(
                            item = %item.name,
                            targets = %TargetId::joined(group),
                            error = %e,
                            "Failed to delete, continuing"
                        );
                    }
                }
            }
        }

        info!(
            attempted = outcome.attempted,
            failed = outcome.failed,
            "Teardown finished"
        );
        outcome
    }

    async fn resolve_targets(&self, unit: &DeploymentUnit) -> Vec<TargetId> {
        match self.targets.resolve(&unit.targets).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "Target resolution failed, treating as no targets");
                Vec::new()
            }
        }
    }

    /// Deploy one item; returns one record per backend call
    async fn apply_item(
        &self,
        ctx: &DeployContext,
        unit: &DeploymentUnit,
        item: &WorkItem,
        targets: &[TargetId],
        cancel: &CancellationToken,
    ) -> Vec<DeploymentRecord> {
        match self.backend.fan_out() {
            FanOut::Grouped => {
                vec![self.apply_to(ctx, unit, item, targets, cancel).await]
            }
            FanOut::PerTarget => {
                let mut records = Vec::with_capacity(targets.len());
                for target in targets.chunks(1) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    records.push(self.apply_to(ctx, unit, item, target, cancel).await);
                }
                records
            }
        }
    }

    /// Merge, deploy and optionally wait for one backend call.
    ///
    /// Values are merged for the first target of the group.
    async fn apply_to(
        &self,
        ctx: &DeployContext,
        unit: &DeploymentUnit,
        item: &WorkItem,
        targets: &[TargetId],
        cancel: &CancellationToken,
    ) -> DeploymentRecord {
        let started = Instant::now();
        let first = &targets[0];

        let values = self
            .merger
            .merge(&item.values, &unit.env, first, &unit.namespace)
            .await;
        for warning in self.merger.validate(&values) {
            warn!(item = %item.name, warning = %warning, "Values warning");
        }

        let mut record = self
            .backend
            .create_or_update(ctx, item, targets, values)
            .await;

        if item.wait && record.status == RecordStatus::Deploying {
            let ready = self
                .backend
                .wait_until_ready(ctx, item, targets, item.timeout, cancel)
                .await;
            if ready {
                record.mark(RecordStatus::Deployed, ready_message(unit.kind, item));
            } else if cancel.is_cancelled() {
                record.mark(RecordStatus::Failed, CANCELLED_MESSAGE);
            } else {
                record.mark(
                    RecordStatus::Failed,
                    format!(
                        "Did not become ready within {}",
                        format_timeout(item.timeout)
                    ),
                );
            }
        } else if record.status == RecordStatus::Deploying {
            debug!(item = %item.name, "Not waiting for readiness");
        }

        record.execution_time = Some(started.elapsed());
        if record.is_failed() {
            warn!(
                item = %item.name,
                targets = %TargetId::joined(targets),
                message = record.message.as_deref().unwrap_or_default(),
                "Item failed"
            );
        }
        record
    }
}

fn starting_message(kind: UnitKind, targets: usize) -> String {
    match kind {
        UnitKind::Stack => format!("Deploying to {targets} clusters"),
        UnitKind::Pipeline => format!("Executing pipeline on {targets} clusters"),
    }
}

fn progress_message(kind: UnitKind, item: &WorkItem, targets: usize) -> String {
    match kind {
        UnitKind::Stack => format!("Deployed {} to {targets} clusters", item.name),
        UnitKind::Pipeline => format!("Executed step {}", item.name),
    }
}

fn ready_message(kind: UnitKind, item: &WorkItem) -> String {
    match kind {
        UnitKind::Stack => format!("{} deployed successfully", item.name),
        UnitKind::Pipeline => format!("Step {} executed successfully", item.name),
    }
}

fn failure_message(kind: UnitKind, failed: usize) -> String {
    match kind {
        UnitKind::Stack => format!("{failed} chart deployments failed"),
        UnitKind::Pipeline => format!("{failed} steps failed"),
    }
}

fn success_message(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Stack => "All charts deployed successfully",
        UnitKind::Pipeline => "All steps executed successfully",
    }
}
