//! ipfs-check binary entry point.
//!
//! This binary starts the routing node and, once its routing table is ready,
//! the HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use libp2p::Multiaddr;
use monas_check::infrastructure::network::libp2p_network::parse_bootstrap_addr;
use monas_check::{CheckConfig, CheckNode, CheckNodeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ipfs-check CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "ipfs-check")]
#[command(about = "Check whether a peer is reachable and serving a CID on IPFS")]
struct Args {
    /// HTTP API listen address.
    #[arg(short = 'l', long, default_value = "0.0.0.0:3333")]
    listen: SocketAddr,

    /// libp2p listen addresses (multiaddr format). Defaults to TCP and QUIC on all interfaces.
    #[arg(long)]
    p2p_listen: Vec<Multiaddr>,

    /// Bootstrap node addresses (multiaddr format, ending in /p2p/<peer-id>).
    #[arg(short, long)]
    bootstrap: Vec<String>,

    /// TOML file with check tunables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dial and store loopback / private addresses.
    #[arg(long)]
    allow_private_addrs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    tracing::info!("Starting ipfs-check");
    tracing::info!("HTTP listen address: {}", args.listen);

    let mut check_config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config from {:?}", path);
            CheckConfig::from_file(path).context("Failed to load config")?
        }
        None => CheckConfig::default(),
    };
    if args.allow_private_addrs {
        check_config.network.allow_private_addrs = true;
    }

    let mut config = CheckNodeConfig::new(args.listen, check_config);

    if !args.p2p_listen.is_empty() {
        config.network_config.listen_addrs = args.p2p_listen;
    }

    if !args.bootstrap.is_empty() {
        let mut bootstrap_nodes = Vec::with_capacity(args.bootstrap.len());
        for addr in &args.bootstrap {
            let (peer_id, addr) = parse_bootstrap_addr(addr)?;
            tracing::info!("Bootstrap peer: {} at {}", peer_id, addr);
            bootstrap_nodes.push((peer_id, addr));
        }
        config.network_config.bootstrap_nodes = bootstrap_nodes;
    }

    // Create and run the node
    let node = CheckNode::new(config)
        .await
        .context("Failed to create check node")?;

    tracing::info!("Peer ID: {}", node.peer_id());

    // Run the node (this blocks until shutdown)
    node.run().await?;

    Ok(())
}
