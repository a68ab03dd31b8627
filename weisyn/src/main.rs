//! Weisyn Network Node
//!
//! Orchestrator binary: loads configuration, wires the routing table and the
//! aggregator consensus stack, and runs until interrupted.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use weisyn::{NodeConfig, WeisynNode};

#[derive(Debug, Parser)]
#[command(name = "weisyn", version, about = "Weisyn network node")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Refuse miner submissions (overrides runtime.read_only)
    #[arg(long)]
    read_only: bool,

    /// Sync mode override: light, pruned, full, archive
    #[arg(long)]
    sync_mode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    info!("weisyn node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NodeConfig::load(args.config.as_deref())?;
    if args.read_only {
        config.runtime.read_only = true;
    }
    if let Some(mode) = &args.sync_mode {
        config.runtime.sync_mode = mode
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown sync mode {mode:?}"))?;
    }

    let node = WeisynNode::start_local(&config)?;
    info!(peer = %node.self_id, "node running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    node.shutdown().await;
    Ok(())
}
