//! CLI error types

use herd_engine::{CycleError, ReconcileError};
use herd_types::ValidationError;
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Manifest failed to parse or validate
    #[error("Invalid manifest: {0}")]
    Manifest(#[from] ValidationError),

    /// Items cannot be ordered
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A reconciliation pass was aborted
    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
