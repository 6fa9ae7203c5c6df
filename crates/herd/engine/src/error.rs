//! Engine error types

use herd_backend::ApiError;
use herd_types::ValidationError;
use thiserror::Error;

/// A dependency cycle between work items.
///
/// `path` runs from the first item of the cycle back to itself, e.g.
/// `["A", "B", "A"]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circular dependency detected: {}", path.join(" -> "))]
pub struct CycleError {
    pub path: Vec<String>,
}

/// Failure to turn a target spec into cluster ids
#[derive(Debug, Error)]
pub enum TargetResolutionError {
    #[error("Cluster API error: {0}")]
    Api(#[from] ApiError),

    #[error("Target spec not supported by this resolver: {0}")]
    Unsupported(String),
}

/// Errors surfaced to the calling framework
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Retrying without changing the resource produces the same error
    #[error("{0}")]
    Permanent(String),
}

impl ReconcileError {
    /// Whether the framework should stop retrying
    pub fn is_permanent(&self) -> bool {
        matches!(self, ReconcileError::Permanent(_))
    }
}

impl From<ValidationError> for ReconcileError {
    fn from(err: ValidationError) -> Self {
        ReconcileError::Permanent(err.to_string())
    }
}

impl From<CycleError> for ReconcileError {
    fn from(err: CycleError) -> Self {
        ReconcileError::Permanent(err.to_string())
    }
}

/// Result type for controller entry points
pub type Result<T> = std::result::Result<T, ReconcileError>;
