//! Herd Types - Core types for multi-cluster reconciliation
//!
//! Herd deploys an ordered set of work items (Helm charts or pipeline steps)
//! onto a dynamically resolved set of clusters, then reports aggregate
//! progress and supports reverse-order teardown.
//!
//! ## Key Concepts
//!
//! - **DeploymentUnit**: One Stack or Pipeline resource; the scope of a single
//!   reconciliation pass
//! - **WorkItem**: A chart or pipeline step inside a unit, with dependencies
//!   and layered value sources
//! - **TargetSpec**: Explicit cluster ids or a label selector
//! - **DeploymentRecord**: Observed outcome of one item on one target
//! - **StatusAggregate**: Phase, records and Ready condition reported back to
//!   the owning resource

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod ids;
pub mod manifest;
pub mod record;
pub mod status;
pub mod timeout;
pub mod unit;

// Re-export main types
pub use error::{Result, ValidationError};
pub use ids::{PassId, TargetId};
pub use manifest::{ManifestMetadata, UnitManifest};
pub use record::{DeploymentRecord, RecordStatus};
pub use status::{Condition, Phase, StatusAggregate, StatusView};
pub use timeout::{format_timeout, parse_timeout, DEFAULT_TIMEOUT};
pub use unit::{
    labels_match, ChartRef, DeploymentUnit, ItemKind, SourceRef, StepType, TargetSpec,
    UnitKind, ValuesSpec, WorkItem,
};
