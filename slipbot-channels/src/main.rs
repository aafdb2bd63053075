//! Slipbot - Main entry point.

use anyhow::Result;
use slipbot_channels::start_server;
use slipbot_common::config::Config;
use slipbot_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (file, then environment overrides) and validate it
    let config = Config::load_and_validate()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Slipbot v{}", env!("CARGO_PKG_VERSION"));

    // Start the HTTP server
    start_server(&config).await
}
