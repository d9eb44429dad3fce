//! # wsmux-runner
//!
//! Runs one multiplexed feed per configured connection and logs every
//! decoded event until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! wsmux-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use wsmux_core::logging::{LogOptions, init_logging};
use wsmux_feeds::FeedModule;
use wsmux_feeds::pipeline::EventHandler;

/// Multiplexed exchange feed runner.
#[derive(Parser)]
#[command(name = "wsmux-runner", about = "Multiplexed exchange feed runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log directory for file output; overrides `module.log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = wsmux_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let file_prefix = config.module_name().unwrap_or("wsmux-runner").to_string();
    init_logging(&LogOptions {
        level: cli.log_level.clone(),
        dir: cli.log_dir.clone().or_else(|| config.log_path().map(str::to_string)),
        file_prefix,
        json: cli.log_json,
    });
    info!(
        "wsmux-runner starting: config={}, {} connection(s)",
        cli.config.display(),
        config.connections.len()
    );

    // 3. Create feed modules from the connections array
    let handler: EventHandler = Arc::new(|feed, event| info!(target: "wsmux::event", "[{feed}] {event}"));
    let mut modules: Vec<Box<dyn FeedModule>> = Vec::new();

    for (idx, conn_config) in config.connections.iter().enumerate() {
        match wsmux_feeds::registry::create_feed_module(conn_config, handler.clone()) {
            Ok(module) => {
                info!("connection[{idx}]: created feed '{}' (exchange={})", module.name(), conn_config.exchange);
                modules.push(module);
            }
            Err(e) => {
                error!("connection[{idx}]: failed to create feed for '{}': {e:#}", conn_config.exchange);
            }
        }
    }

    // Start all modules
    for module in &mut modules {
        module.start().await?;
    }

    info!("all {} feed(s) started, press Ctrl+C to stop", modules.len());

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 5. Stop all modules gracefully
    for module in &mut modules {
        info!("stopping feed '{}'", module.name());
        if let Err(e) = module.stop().await {
            error!("error stopping '{}': {e}", module.name());
        }
    }

    info!("all feeds stopped");
    Ok(())
}
