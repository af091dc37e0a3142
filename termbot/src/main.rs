//! termbot - operate terminal sessions and an AI coding assistant from chat.
//!
//! Architecture:
//! - Messages are classified into directives (slash commands, a phrase table, or raw
//!   shell input)
//! - The router resolves the target session and queues terminal work on that session's
//!   worker; sessions run in parallel, commands within one session run in order
//! - Sessions live in tmux and their metadata persists as JSON records, so they survive
//!   a restart
//! - The CLI is a thin client of the local server

mod assistant;
mod classify;
mod cli;
mod config;
mod error;
mod host;
mod models;
mod process;
mod router;
mod security;
mod server;
mod store;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{execute, Cli};
use config::Config;

/// Overrides the `[logging] level` config value.
const LOG_ENV: &str = "TERMBOT_LOG";

fn log_filter(config: &Config) -> EnvFilter {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| config.logging.level.clone());
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config))
        .with_writer(std::io::stderr)
        .init();

    execute(cli, config).await
}
