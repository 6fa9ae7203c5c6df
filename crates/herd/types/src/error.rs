//! Validation errors for deployment units

use thiserror::Error;

/// Permanent errors raised while reading or checking a unit spec.
///
/// A unit that fails validation is never applied; retrying without
/// changing the spec produces the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Malformed manifest: {0}")]
    Malformed(String),

    #[error("Unsupported kind: {0}")]
    UnknownKind(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate item name: {0}")]
    DuplicateItem(String),

    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    #[error("Step {step}: retries must be between 0 and 10, got {retries}")]
    RetriesOutOfRange { step: String, retries: u32 },

    #[error("Targets must specify clusterIds or selector")]
    NoTargets,

    #[error("Pipeline targets must list clusterIds explicitly")]
    PipelineSelector,
}

/// Result type for unit validation
pub type Result<T> = std::result::Result<T, ValidationError>;
