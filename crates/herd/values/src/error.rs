//! Config source error types

use crate::source::SourceKind;
use thiserror::Error;

/// Errors reading or decoding a single config source.
///
/// None of these abort a merge; the merger logs them and skips the layer.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: SourceKind,
        namespace: String,
        name: String,
    },

    #[error("Key '{key}' not found in {kind} {namespace}/{name}")]
    MissingKey {
        kind: SourceKind,
        namespace: String,
        name: String,
        key: String,
    },

    #[error("Failed to decode secret content: {0}")]
    Decode(String),

    #[error("Failed to parse YAML: {0}")]
    Parse(String),

    #[error("Values document is not a map (got {0})")]
    NotAMap(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether the source (or the key inside it) simply does not exist
    pub fn is_absent(&self) -> bool {
        matches!(self, SourceError::NotFound { .. } | SourceError::MissingKey { .. })
    }
}

/// Result type for config source operations
pub type Result<T> = std::result::Result<T, SourceError>;
