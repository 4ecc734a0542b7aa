//! `ringkv` binary: run a coordinator or a node with an operator console.
//!
//! # Usage
//!
//! ```bash
//! ringkv coordinator --config coordinator.toml
//! ringkv node --config node-500.toml
//!
//! # More logging
//! RUST_LOG=ringkv=debug ringkv node --config node-500.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ringkv::cluster::{CoordinatorService, NodeService};
use ringkv::config::{CoordinatorConfig, NodeConfig};
use ringkv::console::{run_coordinator_console, run_node_console};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ringkv", version, about = "Range-partitioned key-value ring")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Run the coordinator, which owns the ring and the top key range.
    Coordinator {
        /// TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a node that can enter and exit the ring.
    Node {
        /// TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ringkv=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let input = BufReader::new(tokio::io::stdin());
    let mut out = std::io::stdout();

    match cli.role {
        Role::Coordinator { config } => {
            let config = CoordinatorConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let service = CoordinatorService::start(config).await?;
            info!(addr = %service.local_addr(), "Coordinator ready");

            run_coordinator_console(&service, input, &mut out).await?;
            service.shutdown().await?;
        }
        Role::Node { config } => {
            let config = NodeConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let node = NodeService::new(config);
            info!(node_id = node.node_id(), "Node ready, type `enter` to join");

            run_node_console(&node, input, &mut out).await?;
        }
    }

    Ok(())
}
