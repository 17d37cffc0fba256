#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use turbomarket::{Config, Controller, find_config_file};

/// Generate and deliver marketing email from a job queue
#[derive(Parser, Debug)]
#[command(name = "turbomarket")]
#[command(version)]
struct Cli {
    /// Configuration file; overrides `TURBOMARKET_CONFIG` and the default
    /// locations
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config)?;
    let config = Config::load(&config_path)?;

    Controller::new(config).run().await
}
