//! PanoBot - Main entry point.

use anyhow::Result;
use clap::Parser;
use pano_common::config::Config;
use pano_common::logging::init_logging;
use std::path::PathBuf;

/// Telegram bot that stitches uploaded pictures into panoramas.
#[derive(Parser, Debug)]
#[command(name = "pano-bot", version, about)]
struct Cli {
    /// Config file (defaults to ~/.panobot/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load_with_env(cli.config.as_deref())?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("PanoBot v{}", env!("CARGO_PKG_VERSION"));

    pano_bot::start_bot(&config).await
}
