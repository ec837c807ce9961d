//! Check Node - wires the routing node, the check service and the HTTP API
//! into one process.

use crate::application_service::check_service::CheckService;
use crate::config::CheckConfig;
use crate::infrastructure::network::{Libp2pNetwork, Libp2pNetworkConfig, Libp2pProbeHostFactory};
use crate::port::routing_layer::RoutingLayer;
use crate::presentation::http_api::{create_router, AppState};
use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// Configuration for the check node.
#[derive(Debug, Clone)]
pub struct CheckNodeConfig {
    /// HTTP API listen address.
    pub http_addr: SocketAddr,
    /// Network configuration.
    pub network_config: Libp2pNetworkConfig,
    /// Check tunables.
    pub check_config: CheckConfig,
}

impl Default for CheckNodeConfig {
    fn default() -> Self {
        Self::new(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3333)),
            CheckConfig::default(),
        )
    }
}

impl CheckNodeConfig {
    /// Build a node config whose network tunables come from `check_config`.
    pub fn new(http_addr: SocketAddr, check_config: CheckConfig) -> Self {
        let network_config = Libp2pNetworkConfig {
            ready_min_peers: check_config.network.ready_min_peers,
            max_established_connections: check_config.network.max_established_connections,
            allow_private_addrs: check_config.network.allow_private_addrs,
            ..Default::default()
        };
        Self {
            http_addr,
            network_config,
            check_config,
        }
    }
}

/// Check Node instance.
pub struct CheckNode {
    config: CheckNodeConfig,
    service: AppState,
    network: Arc<Libp2pNetwork>,
}

impl CheckNode {
    /// Create a new CheckNode with the given configuration.
    pub async fn new(config: CheckNodeConfig) -> Result<Self> {
        let network = Arc::new(
            Libp2pNetwork::new(config.network_config.clone())
                .await
                .context("Failed to create network")?,
        );

        let probe_factory = Arc::new(Libp2pProbeHostFactory::new(
            config.network_config.allow_private_addrs,
        ));

        let service = Arc::new(CheckService::new(
            network.clone(),
            probe_factory,
            config.check_config.clone(),
        ));

        Ok(Self {
            config,
            service,
            network,
        })
    }

    /// Get the peer ID of the routing node.
    pub fn peer_id(&self) -> String {
        self.network.local_peer_id().to_string()
    }

    /// Get a reference to the service.
    pub fn service(&self) -> &AppState {
        &self.service
    }

    /// Get a reference to the network.
    pub fn network(&self) -> &Arc<Libp2pNetwork> {
        &self.network
    }

    /// Get the addresses the routing node is listening on.
    pub async fn listen_addrs(&self) -> Vec<String> {
        self.network
            .listen_addrs()
            .await
            .into_iter()
            .map(|a| a.to_string())
            .collect()
    }

    /// Block until the routing table is usable.
    pub async fn wait_until_ready(&self) {
        let mut interval = tokio::time::interval(self.config.check_config.ready_poll_interval());
        loop {
            interval.tick().await;
            if self.network.is_ready() {
                return;
            }
            tracing::info!(
                "Waiting for routing table: {} peers",
                self.network.routing_table_size().await
            );
        }
    }

    /// Run the node (HTTP server once the routing table is ready).
    pub async fn run(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.http_addr)
            .await
            .context("Failed to bind HTTP listener")?;

        tracing::info!(
            "Starting check node {} on {}",
            self.peer_id(),
            self.config.http_addr
        );

        self.wait_until_ready().await;
        tracing::info!("Ready to start serving");

        let router = create_router(self.service.clone());
        axum::serve(listener, router)
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}
