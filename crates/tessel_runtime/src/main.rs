//! Tessel Runtime
//!
//! Command-line front end for the grid engine.

mod cli;
mod commands;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    tracing::info!("Tessel v{}", tessel_core::VERSION);

    let cli = cli::Cli::parse();
    commands::run(cli).await
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
}
