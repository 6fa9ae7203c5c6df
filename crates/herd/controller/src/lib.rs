//! Herd command-line controller
//!
//! Loads Stack and Pipeline manifests and drives them through the
//! reconciliation engine:
//! - `order`: dependency order of a unit's items
//! - `render`: merged values for one item on one cluster
//! - `simulate`: a full apply (and optional teardown) against in-memory
//!   clusters

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

// Re-export main types
pub use cli::{Cli, ClusterArg, Commands};
pub use config::{ControllerConfig, HerdConfig, LoggingConfig, RancherConfig, StackBackend};
pub use error::{CliError, CliResult};

/// Run one command
pub async fn run(command: Commands, config: &HerdConfig) -> CliResult<()> {
    match command {
        Commands::Order { manifest } => commands::order::execute(&manifest).await,
        Commands::Render {
            manifest,
            item,
            target,
            values_dir,
        } => {
            commands::render::execute(
                &manifest,
                &item,
                &target,
                values_dir.as_deref(),
                &config.values,
            )
            .await
        }
        Commands::Simulate {
            manifest,
            values_dir,
            clusters,
            teardown,
        } => {
            commands::simulate::execute(
                &manifest,
                values_dir.as_deref(),
                &clusters,
                teardown,
                config,
            )
            .await
        }
    }
}
