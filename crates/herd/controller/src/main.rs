//! herdctl - Herd command-line controller

use anyhow::Context;
use clap::Parser;
use herd_controller::{logging, Cli, HerdConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = HerdConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init(&logging::effective(
        &config.logging,
        cli.log_level.as_deref(),
        cli.json,
    ));

    herd_controller::run(cli.command, &config).await?;
    Ok(())
}
