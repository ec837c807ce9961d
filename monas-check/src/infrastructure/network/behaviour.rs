//! Network behaviours for the routing node and the probe hosts.

use super::protocol::KAD_PROTOCOL;
use libp2p::{
    connection_limits::{self, ConnectionLimits},
    identify,
    identity::Keypair,
    kad::{self, store::MemoryStore},
    ping,
    swarm::NetworkBehaviour,
    PeerId, StreamProtocol,
};
use std::time::Duration;

/// Identify protocol version announced by both hosts.
pub const IDENTIFY_PROTOCOL: &str = "/ipfs/id/1.0.0";

/// Configuration for the routing node behaviour.
#[derive(Debug, Clone)]
pub struct BehaviourConfig {
    pub kad_protocol: StreamProtocol,
    pub kad_query_timeout: Duration,
    pub max_established_connections: u32,
}

impl Default for BehaviourConfig {
    fn default() -> Self {
        Self {
            kad_protocol: KAD_PROTOCOL,
            kad_query_timeout: Duration::from_secs(60),
            max_established_connections: 900,
        }
    }
}

/// Behaviour of the long-running routing node.
///
/// Kademlia runs in client mode: the node queries the DHT but never serves
/// records.
#[derive(NetworkBehaviour)]
pub struct CheckBehaviour {
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub stream: libp2p_stream::Behaviour,
    pub limits: connection_limits::Behaviour,
}

impl CheckBehaviour {
    pub fn new(local_peer_id: PeerId, keypair: &Keypair, config: BehaviourConfig) -> Self {
        let mut kad_config = kad::Config::new(config.kad_protocol);
        kad_config.set_query_timeout(config.kad_query_timeout);

        let mut kademlia =
            kad::Behaviour::with_config(local_peer_id, MemoryStore::new(local_peer_id), kad_config);
        kademlia.set_mode(Some(kad::Mode::Client));

        let limits = ConnectionLimits::default()
            .with_max_established(Some(config.max_established_connections));

        Self {
            kademlia,
            identify: identify::Behaviour::new(identify_config(keypair)),
            ping: ping::Behaviour::new(ping::Config::new()),
            stream: libp2p_stream::Behaviour::new(),
            limits: connection_limits::Behaviour::new(limits),
        }
    }
}

/// Behaviour of a short-lived probe host.
#[derive(NetworkBehaviour)]
pub struct ProbeBehaviour {
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub stream: libp2p_stream::Behaviour,
}

impl ProbeBehaviour {
    pub fn new(keypair: &Keypair) -> Self {
        Self {
            identify: identify::Behaviour::new(identify_config(keypair)),
            ping: ping::Behaviour::new(ping::Config::new()),
            stream: libp2p_stream::Behaviour::new(),
        }
    }
}

fn identify_config(keypair: &Keypair) -> identify::Config {
    identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
        .with_agent_version(format!("ipfs-check/{}", env!("CARGO_PKG_VERSION")))
}
