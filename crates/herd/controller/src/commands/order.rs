//! `herdctl order`

use super::load_unit;
use crate::error::CliResult;
use herd_engine::{order_names, CycleError};
use herd_types::DeploymentUnit;
use std::path::Path;

/// Print the apply order, one item per line
pub async fn execute(manifest: &Path) -> CliResult<()> {
    let unit = load_unit(manifest).await?;
    for line in order_lines(&unit)? {
        println!("{line}");
    }
    Ok(())
}

/// Numbered apply order, with each item's declared dependencies
pub fn order_lines(unit: &DeploymentUnit) -> Result<Vec<String>, CycleError> {
    let names = order_names(&unit.items)?;
    Ok(names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let deps = unit
                .item(name)
                .map(|item| item.depends_on.join(", "))
                .unwrap_or_default();
            if deps.is_empty() {
                format!("{:>3}. {name}", i + 1)
            } else {
                format!("{:>3}. {name} (after {deps})", i + 1)
            }
        })
        .collect())
}
