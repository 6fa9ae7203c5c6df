//! `herdctl render`

use super::{config_source, load_unit};
use crate::error::{CliError, CliResult};
use herd_types::{DeploymentUnit, TargetId};
use herd_values::{ConfigSourceProvider, MergerConfig, ValuesMerger};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Merged values for one item on one target
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub values: Map<String, Value>,
    pub warnings: Vec<String>,
}

/// Print merged values as YAML; warnings go to stderr
pub async fn execute(
    manifest: &Path,
    item: &str,
    target: &str,
    values_dir: Option<&Path>,
    config: &MergerConfig,
) -> CliResult<()> {
    let unit = load_unit(manifest).await?;
    let rendered = render(&unit, item, target, config_source(values_dir), config).await?;

    for warning in &rendered.warnings {
        eprintln!("warning: {warning}");
    }
    print!("{}", serde_yaml::to_string(&Value::Object(rendered.values))?);
    Ok(())
}

/// Merge values for `item` on `target`
pub async fn render(
    unit: &DeploymentUnit,
    item: &str,
    target: &str,
    provider: Arc<dyn ConfigSourceProvider>,
    config: &MergerConfig,
) -> CliResult<Rendered> {
    let item = unit
        .item(item)
        .ok_or_else(|| CliError::NotFound(format!("item '{item}' in {}", unit.name)))?;

    let merger = ValuesMerger::with_config(provider, config.clone());
    let values = merger
        .merge(&item.values, &unit.env, &TargetId::new(target), &unit.namespace)
        .await;
    let warnings = merger.validate(&values);

    Ok(Rendered { values, warnings })
}
