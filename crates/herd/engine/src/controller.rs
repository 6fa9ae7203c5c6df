//! Event entry points for the calling framework
//!
//! The framework guarantees at most one in-flight event per unit. The
//! controller keeps one cancellation token per unit so a delete can stop a
//! pass that is still waiting on readiness, and waits for that pass to
//! return before tearing anything down.

use crate::engine::{ReconciliationEngine, TeardownOutcome};
use crate::error::Result;
use crate::sink::UnitRef;
use dashmap::DashMap;
use herd_types::{DeploymentUnit, Phase, StatusAggregate, UnitKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// A running apply pass
struct InFlight {
    pass: u64,
    token: CancellationToken,
    /// Held by the pass until it returns
    running: Arc<Mutex<()>>,
}

impl InFlight {
    /// Cancel the pass and wait until it has returned
    async fn stop(self) {
        self.token.cancel();
        let _finished = self.running.lock().await;
        debug!(pass = self.pass, "In-flight pass stopped");
    }
}

/// Create, update and delete handlers over a [`ReconciliationEngine`]
pub struct Controller {
    engine: Arc<ReconciliationEngine>,
    in_flight: DashMap<UnitRef, InFlight>,
    next_pass: AtomicU64,
}

impl Controller {
    /// Create a controller over an engine
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self {
            engine,
            in_flight: DashMap::new(),
            next_pass: AtomicU64::new(0),
        }
    }

    /// The engine driving every pass
    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Handle a newly created unit
    #[instrument(skip(self, unit), fields(unit = %UnitRef::of(unit)))]
    pub async fn on_create(&self, unit: &DeploymentUnit) -> Result<StatusAggregate> {
        self.run(unit, started_message(unit.kind, "creation")).await
    }

    /// Handle a changed unit
    #[instrument(skip(self, unit), fields(unit = %UnitRef::of(unit)))]
    pub async fn on_update(&self, unit: &DeploymentUnit) -> Result<StatusAggregate> {
        self.run(unit, started_message(unit.kind, "update")).await
    }

    /// Handle a deleted unit. Never fails.
    #[instrument(skip(self, unit), fields(unit = %UnitRef::of(unit)))]
    pub async fn on_delete(&self, unit: &DeploymentUnit) -> TeardownOutcome {
        let key = UnitRef::of(unit);
        if let Some((_, pass)) = self.in_flight.remove(&key) {
            info!("Cancelling in-flight reconciliation");
            pass.stop().await;
        }

        let mut status = StatusAggregate::new(unit.kind, unit.generation);
        status.advance(Phase::Deleting, started_message(unit.kind, "deletion"));
        self.engine.report(unit, &status).await;

        let outcome = self.engine.teardown(unit).await;
        info!(
            attempted = outcome.attempted,
            failed = outcome.failed,
            "{} deleted",
            unit.kind
        );
        outcome
    }

    /// Whether a pass for `unit` is currently running
    pub fn is_in_flight(&self, unit: &DeploymentUnit) -> bool {
        self.in_flight.contains_key(&UnitRef::of(unit))
    }

    async fn run(&self, unit: &DeploymentUnit, pending: String) -> Result<StatusAggregate> {
        let key = UnitRef::of(unit);
        let token = CancellationToken::new();
        let pass = self.next_pass.fetch_add(1, Ordering::Relaxed);
        let running = Arc::new(Mutex::new(()));
        let _running = running.clone().lock_owned().await;

        let current = InFlight {
            pass,
            token: token.clone(),
            running,
        };
        if let Some(previous) = self.in_flight.insert(key.clone(), current) {
            previous.stop().await;
        }

        let mut status = StatusAggregate::new(unit.kind, unit.generation);
        status.advance(Phase::Pending, pending);
        self.engine.report(unit, &status).await;

        let outcome = self.engine.apply(unit, &token).await;

        // A delete or a newer pass may have replaced the entry
        self.in_flight.remove_if(&key, |_, current| current.pass == pass);

        match outcome.error {
            Some(e) => Err(e),
            None => Ok(outcome.status),
        }
    }
}

fn started_message(kind: UnitKind, event: &str) -> String {
    format!("{kind} {event} started")
}
