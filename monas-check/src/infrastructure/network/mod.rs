//! Network infrastructure using libp2p.
//!
//! This module provides the P2P side of the checker:
//! - Kademlia DHT client for closest-peer, provider and peer lookups
//! - raw FIND_NODE requests over `libp2p_stream`
//! - short-lived probe hosts that speak a minimal Bitswap want-have
//! - TCP and QUIC transports

pub mod addr_filter;
pub mod behaviour;
pub mod libp2p_network;
pub mod probe_host;
pub mod protocol;
pub mod transport;

pub use behaviour::{BehaviourConfig, CheckBehaviour, CheckBehaviourEvent, ProbeBehaviour};
pub use libp2p_network::{Libp2pNetwork, Libp2pNetworkConfig};
pub use probe_host::{Libp2pProbeHost, Libp2pProbeHostFactory};
