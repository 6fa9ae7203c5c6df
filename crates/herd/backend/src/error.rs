//! Backend error types

use herd_types::StepType;
use thiserror::Error;

/// Errors returned by cluster API collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether polling may continue after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Whether the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_) | ApiError::Status { code: 404, .. })
    }
}

/// Errors from a backend operation.
///
/// `create_or_update` folds these into a `Failed` record; only `delete`
/// returns them to the caller.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("No targets given")]
    NoTargets,

    #[error("No handler registered for step type {0}")]
    NoHandler(StepType),

    #[error("Item {item} cannot be deployed by this backend: {reason}")]
    Unsupported { item: String, reason: String },

    #[error("Deletion failed on {failed} of {total} targets")]
    PartialDelete { failed: usize, total: usize },
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;
