//! CLI command implementations

pub mod order;
pub mod render;
pub mod simulate;

use crate::error::CliResult;
use herd_types::{DeploymentUnit, UnitManifest};
use herd_values::{ConfigSourceProvider, DirectoryConfigSource, InMemoryConfigSource};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Read and validate a Stack or Pipeline manifest
pub async fn load_unit(path: &Path) -> CliResult<DeploymentUnit> {
    let text = tokio::fs::read_to_string(path).await?;
    let unit = UnitManifest::from_yaml(&text)?.into_unit()?;
    debug!(
        manifest = %path.display(),
        kind = %unit.kind,
        name = %unit.name,
        items = unit.items.len(),
        "Loaded manifest"
    );
    Ok(unit)
}

/// Values sources: a directory tree when given, otherwise nothing
pub fn config_source(values_dir: Option<&Path>) -> Arc<dyn ConfigSourceProvider> {
    match values_dir {
        Some(dir) => Arc::new(DirectoryConfigSource::new(dir)),
        None => Arc::new(InMemoryConfigSource::new()),
    }
}
