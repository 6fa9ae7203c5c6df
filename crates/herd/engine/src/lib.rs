//! Herd Engine - Reconciliation of deployment units across clusters
//!
//! A pass resolves the unit's targets, linearizes its items by dependency,
//! and applies them one at a time through a [`herd_backend::DeploymentBackend`],
//! reporting progressive status through a [`StatusSink`]. Teardown walks the
//! same order in reverse.
//!
//! ## Failure policy
//!
//! Only validation errors and dependency cycles abort a pass. Per-item
//! failures become `Failed` records and later items are still attempted.
//! Teardown errors are logged and never surfaced.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod controller;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod sink;
pub mod target;

// Re-export main types
pub use controller::Controller;
pub use engine::{PassOutcome, ReconciliationEngine, TeardownOutcome, CANCELLED_MESSAGE};
pub use error::{CycleError, ReconcileError, Result, TargetResolutionError};
pub use resolver::{order, order_names};
pub use sink::{InMemoryStatusSink, StatusSink, TracingStatusSink, UnitRef};
pub use target::{
    FleetTargetResolver, RancherTargetResolver, StaticTargetResolver, TargetResolver,
};
