//! Herd Backend - Pluggable deployment backends
//!
//! A backend idempotently creates, updates and deletes the deployment of one
//! work item, and can poll for readiness. Three backends ship:
//!
//! - [`BundleBackend`]: one Fleet Bundle fanned out to every target at once
//! - [`AppBackend`]: one Rancher App per target
//! - [`StepBackend`]: pipeline steps, dispatched to one [`StepHandler`] per
//!   step type
//!
//! Cluster APIs are reached through the [`FleetApi`] and [`RancherApi`]
//! traits; in-memory implementations are provided for development and tests.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod app;
pub mod backend;
pub mod bundle;
pub mod error;
pub mod fleet;
mod poll;
pub mod rancher;
pub mod step;

pub use app::AppBackend;
pub use backend::{DeployContext, DeploymentBackend, FanOut};
pub use bundle::{BundleBackend, FleetSettings};
pub use error::{ApiError, BackendError, Result};
pub use fleet::{
    ApiCondition, Bundle, BundleSpec, BundleStatus, BundleTarget, ClusterRegistration,
    FleetApi, FleetCluster, HelmOptions, InMemoryFleetApi,
};
pub use rancher::{
    App, AppChart, AppSpec, AppStatus, InMemoryRancherApi, RancherApi, RancherCluster,
};
pub use step::{ChartStepHandler, StepBackend, StepHandler};
