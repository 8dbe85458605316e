//! Modelboard Server - Entry Point
//!
//! Starts the HTTP server that trains, measures and ranks gesture classifiers.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use modelboard_core::config::{Config, StorageConfig};
use modelboard_core::server;

/// Modelboard - train and compare gesture classifiers
#[derive(Parser, Debug)]
#[command(name = "modelboard", author, version, about)]
struct Cli {
    /// Config file (defaults to ./modelboard.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config and MODELBOARD_ADDRESS)
    #[arg(short, long)]
    address: Option<SocketAddr>,

    /// Root directory for data, results and trained models
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "modelboard_core=debug,info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(address) = cli.address {
        config.server.address = address;
    }
    if let Some(root) = &cli.data_root {
        config.storage = StorageConfig::rooted_at(root);
    }
    info!(address = %config.server.address, "starting modelboard");

    server::run(&config).await.context("server error")?;
    Ok(())
}
