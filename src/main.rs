//! Conductor - memory-augmented multi-agent orchestration
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod agents;
mod cli;
mod config;
mod runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let config = config::load_config()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.logging.directive().into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json || config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    debug!(
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir().display(),
        "Conductor v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    cli::run(cli.command, config).await
}
