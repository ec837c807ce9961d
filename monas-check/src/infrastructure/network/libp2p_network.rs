//! libp2p-based routing layer.
//!
//! A single swarm task owns the routing node:
//! - Kademlia DHT in client mode for closest-peer, provider and peer lookups
//! - Identify to learn the listen addresses of connected peers
//! - raw `libp2p_stream` streams for single-peer FIND_NODE requests
//!
//! Callers talk to the task through a command channel and get their answers
//! back over oneshot channels.

use super::addr_filter::filter_dialable;
use super::behaviour::{BehaviourConfig, CheckBehaviour, CheckBehaviourEvent};
use super::protocol::{read_message, write_message, KadMessage, KAD_PROTOCOL};
use super::transport;
use crate::domain::addr_info::AddrInfo;
use crate::port::routing_layer::{ProviderStream, RoutingLayer};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cid::Cid;
use futures::{AsyncWriteExt, StreamExt};
use libp2p::{
    identify, kad,
    multiaddr::Protocol,
    swarm::{dial_opts::DialOpts, DialError, SwarmEvent},
    Multiaddr, PeerId, StreamProtocol, Swarm,
};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Public IPFS bootstrap peers.
pub const DEFAULT_BOOTSTRAP_NODES: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
    "/ip4/104.131.131.82/udp/4001/quic-v1/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// Peers remembered for dialling before the address book is reset.
const ADDRESS_BOOK_LIMIT: usize = 10_000;

/// Split `/.../p2p/<peer-id>` into the peer id and its transport address.
pub fn parse_bootstrap_addr(s: &str) -> Result<(PeerId, Multiaddr)> {
    let mut addr: Multiaddr = s
        .parse()
        .with_context(|| format!("Invalid bootstrap multiaddr: {s}"))?;
    match addr.pop() {
        Some(Protocol::P2p(peer_id)) => Ok((peer_id, addr)),
        _ => Err(anyhow!("Bootstrap address must end with /p2p/<peer-id>: {s}")),
    }
}

pub fn default_bootstrap_nodes() -> Vec<(PeerId, Multiaddr)> {
    DEFAULT_BOOTSTRAP_NODES
        .iter()
        .filter_map(|s| parse_bootstrap_addr(s).ok())
        .collect()
}

fn default_listen_addrs() -> Vec<Multiaddr> {
    vec![
        Multiaddr::empty()
            .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
            .with(Protocol::Tcp(0)),
        Multiaddr::empty()
            .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
            .with(Protocol::Udp(0))
            .with(Protocol::QuicV1),
    ]
}

/// Configuration for the libp2p network.
#[derive(Debug, Clone)]
pub struct Libp2pNetworkConfig {
    /// Listen addresses for the node.
    pub listen_addrs: Vec<Multiaddr>,
    /// Bootstrap nodes to connect to.
    pub bootstrap_nodes: Vec<(PeerId, Multiaddr)>,
    /// Kademlia protocol name.
    pub kad_protocol: StreamProtocol,
    /// Routing table entries needed before the node reports ready.
    pub ready_min_peers: usize,
    pub max_established_connections: u32,
    /// Dial and store loopback / private addresses.
    pub allow_private_addrs: bool,
}

impl Default for Libp2pNetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: default_listen_addrs(),
            bootstrap_nodes: default_bootstrap_nodes(),
            kad_protocol: KAD_PROTOCOL,
            ready_min_peers: 20,
            max_established_connections: 900,
            allow_private_addrs: false,
        }
    }
}

/// Commands sent to the swarm event loop.
enum SwarmCommand {
    GetClosestPeers {
        target: PeerId,
        reply: oneshot::Sender<Result<Vec<PeerId>>>,
    },
    FindPeer {
        peer: PeerId,
        reply: oneshot::Sender<Result<AddrInfo>>,
    },
    GetProviders {
        key: kad::RecordKey,
        limit: usize,
        results: mpsc::UnboundedSender<AddrInfo>,
        reply: oneshot::Sender<kad::QueryId>,
    },
    CancelQuery {
        id: kad::QueryId,
    },
    Connect {
        peer: PeerId,
        reply: oneshot::Sender<Result<()>>,
    },
    GetListenAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    RoutingTableSize {
        reply: oneshot::Sender<usize>,
    },
}

/// A running provider search.
struct ProviderQuery {
    results: mpsc::UnboundedSender<AddrInfo>,
    seen: HashSet<PeerId>,
    limit: usize,
}

impl ProviderQuery {
    fn new(results: mpsc::UnboundedSender<AddrInfo>, limit: usize) -> Self {
        Self {
            results,
            seen: HashSet::new(),
            limit,
        }
    }

    /// Forward `info` unless its peer was already reported. Returns true once
    /// the query should be finished.
    fn offer(&mut self, info: AddrInfo) -> bool {
        if !self.seen.insert(info.peer_id) {
            return false;
        }
        self.results.send(info).is_err() || (self.limit > 0 && self.seen.len() >= self.limit)
    }
}

/// Pending requests tracking.
#[derive(Default)]
struct PendingRequests {
    closest_peers: HashMap<kad::QueryId, oneshot::Sender<Result<Vec<PeerId>>>>,
    find_peer: HashMap<kad::QueryId, (PeerId, oneshot::Sender<Result<AddrInfo>>)>,
    providers: HashMap<kad::QueryId, ProviderQuery>,
    dials: HashMap<PeerId, Vec<oneshot::Sender<Result<()>>>>,
}

/// Addresses learned from lookups and identify, used when dialling a peer
/// for a FIND_NODE request.
#[derive(Default)]
struct AddressBook {
    peers: HashMap<PeerId, Vec<Multiaddr>>,
}

impl AddressBook {
    fn add(&mut self, peer: PeerId, addrs: Vec<Multiaddr>) {
        if addrs.is_empty() {
            return;
        }
        if self.peers.len() >= ADDRESS_BOOK_LIMIT && !self.peers.contains_key(&peer) {
            debug!("Address book full, resetting");
            self.peers.clear();
        }
        let known = self.peers.entry(peer).or_default();
        for addr in addrs {
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    fn get(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.peers.get(peer).cloned().unwrap_or_default()
    }
}

/// State owned by the swarm task.
struct NodeState {
    pending: PendingRequests,
    address_book: AddressBook,
    ready: Arc<AtomicBool>,
    bootstrapped: bool,
    ready_min_peers: usize,
    allow_private_addrs: bool,
    kad_protocol: StreamProtocol,
}

/// libp2p-based routing layer implementation.
pub struct Libp2pNetwork {
    local_peer_id: PeerId,
    command_tx: mpsc::Sender<SwarmCommand>,
    control: libp2p_stream::Control,
    kad_protocol: StreamProtocol,
    ready: Arc<AtomicBool>,
}

impl Libp2pNetwork {
    /// Create the routing node and spawn its swarm loop.
    pub async fn new(config: Libp2pNetworkConfig) -> Result<Self> {
        let keypair = libp2p::identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        info!("Local peer ID: {}", local_peer_id);

        let transport =
            transport::build_transport(&keypair).context("Failed to build transport")?;

        let behaviour = CheckBehaviour::new(
            local_peer_id,
            &keypair,
            BehaviourConfig {
                kad_protocol: config.kad_protocol.clone(),
                max_established_connections: config.max_established_connections,
                ..Default::default()
            },
        );

        let swarm_config = libp2p::swarm::Config::with_tokio_executor()
            .with_idle_connection_timeout(Duration::from_secs(60));

        let mut swarm = Swarm::new(transport, behaviour, local_peer_id, swarm_config);
        let control = swarm.behaviour().stream.new_control();

        for addr in &config.listen_addrs {
            match swarm.listen_on(addr.clone()) {
                Ok(_) => debug!("Listening on {}", addr),
                Err(e) => warn!("Failed to listen on {}: {}", addr, e),
            }
        }

        for (peer_id, addr) in &config.bootstrap_nodes {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(peer_id, addr.clone());
            info!("Added bootstrap node: {} at {}", peer_id, addr);
        }

        if !config.bootstrap_nodes.is_empty() {
            if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
                warn!("Failed to bootstrap Kademlia: {:?}", e);
            }
        }

        // Without bootstrap nodes there is nothing to wait for.
        let ready = Arc::new(AtomicBool::new(
            config.bootstrap_nodes.is_empty() && config.ready_min_peers == 0,
        ));

        let state = NodeState {
            pending: PendingRequests::default(),
            address_book: AddressBook::default(),
            ready: ready.clone(),
            bootstrapped: config.bootstrap_nodes.is_empty(),
            ready_min_peers: config.ready_min_peers,
            allow_private_addrs: config.allow_private_addrs,
            kad_protocol: config.kad_protocol.clone(),
        };

        let (command_tx, command_rx) = mpsc::channel(256);

        tokio::spawn(Self::run_swarm_loop(swarm, command_rx, state));

        Ok(Self {
            local_peer_id,
            command_tx,
            control,
            kad_protocol: config.kad_protocol,
            ready,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Get the addresses this node is listening on.
    pub async fn listen_addrs(&self) -> Vec<Multiaddr> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(SwarmCommand::GetListenAddrs { reply: reply_tx })
            .await
            .is_err()
        {
            return vec![];
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Number of peers in the Kademlia routing table.
    pub async fn routing_table_size(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(SwarmCommand::RoutingTableSize { reply: reply_tx })
            .await
            .is_err()
        {
            return 0;
        }
        reply_rx.await.unwrap_or_default()
    }

    async fn send_command(&self, cmd: SwarmCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("Failed to send command"))
    }

    /// Make sure a connection to `peer` exists, dialling it if needed.
    async fn connect(&self, peer: PeerId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(SwarmCommand::Connect { peer, reply: tx })
            .await?;
        rx.await
            .map_err(|_| anyhow!("Failed to receive response"))?
    }

    /// Run the swarm event loop until every handle to the network is dropped.
    async fn run_swarm_loop(
        mut swarm: Swarm<CheckBehaviour>,
        mut command_rx: mpsc::Receiver<SwarmCommand>,
        mut state: NodeState,
    ) {
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => Self::handle_command(&mut swarm, &mut state, cmd),
                    None => {
                        debug!("Command channel closed, stopping swarm loop");
                        break;
                    }
                },
                event = swarm.select_next_some() => {
                    Self::handle_swarm_event(&mut swarm, &mut state, event);
                }
            }
        }
    }

    fn handle_command(swarm: &mut Swarm<CheckBehaviour>, state: &mut NodeState, cmd: SwarmCommand) {
        match cmd {
            SwarmCommand::GetClosestPeers { target, reply } => {
                let query_id = swarm.behaviour_mut().kademlia.get_closest_peers(target);
                state.pending.closest_peers.insert(query_id, reply);
            }
            SwarmCommand::FindPeer { peer, reply } => {
                if swarm.is_connected(&peer) {
                    let addrs = state.address_book.get(&peer);
                    if !addrs.is_empty() {
                        let _ = reply.send(Ok(AddrInfo::new(peer, addrs)));
                        return;
                    }
                }
                let query_id = swarm.behaviour_mut().kademlia.get_closest_peers(peer);
                state.pending.find_peer.insert(query_id, (peer, reply));
            }
            SwarmCommand::GetProviders {
                key,
                limit,
                results,
                reply,
            } => {
                let query_id = swarm.behaviour_mut().kademlia.get_providers(key);
                state
                    .pending
                    .providers
                    .insert(query_id, ProviderQuery::new(results, limit));
                let _ = reply.send(query_id);
            }
            SwarmCommand::CancelQuery { id } => {
                if state.pending.providers.remove(&id).is_some() {
                    if let Some(mut query) = swarm.behaviour_mut().kademlia.query_mut(&id) {
                        query.finish();
                    }
                    debug!("Provider query {:?} cancelled", id);
                }
            }
            SwarmCommand::Connect { peer, reply } => {
                Self::handle_connect(swarm, state, peer, reply);
            }
            SwarmCommand::GetListenAddrs { reply } => {
                let addrs: Vec<Multiaddr> = swarm.listeners().cloned().collect();
                let _ = reply.send(addrs);
            }
            SwarmCommand::RoutingTableSize { reply } => {
                let _ = reply.send(routing_table_size(swarm));
            }
        }
    }

    fn handle_connect(
        swarm: &mut Swarm<CheckBehaviour>,
        state: &mut NodeState,
        peer: PeerId,
        reply: oneshot::Sender<Result<()>>,
    ) {
        if swarm.is_connected(&peer) {
            let _ = reply.send(Ok(()));
            return;
        }

        let opts = DialOpts::peer_id(peer)
            .addresses(state.address_book.get(&peer))
            .extend_addresses_through_behaviour()
            .build();

        match swarm.dial(opts) {
            Ok(()) | Err(DialError::DialPeerConditionFalse(_)) => {
                state.pending.dials.entry(peer).or_default().push(reply);
            }
            Err(e) => {
                let _ = reply.send(Err(anyhow!("Failed to dial {}: {}", peer, e)));
            }
        }
    }

    fn handle_swarm_event(
        swarm: &mut Swarm<CheckBehaviour>,
        state: &mut NodeState,
        event: SwarmEvent<CheckBehaviourEvent>,
    ) {
        match event {
            SwarmEvent::Behaviour(CheckBehaviourEvent::Kademlia(kad_event)) => {
                Self::handle_kademlia_event(swarm, state, kad_event);
            }
            SwarmEvent::Behaviour(CheckBehaviourEvent::Identify(identify_event)) => {
                Self::handle_identify_event(swarm, state, identify_event);
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                debug!(
                    "Connection established with {} at {}",
                    peer_id,
                    endpoint.get_remote_address()
                );
                if let Some(waiters) = state.pending.dials.remove(&peer_id) {
                    for reply in waiters {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                debug!("Outgoing connection to {} failed: {}", peer_id, error);
                if let Some(waiters) = state.pending.dials.remove(&peer_id) {
                    let message = error.to_string();
                    for reply in waiters {
                        let _ = reply.send(Err(anyhow!("Failed to dial {}: {}", peer_id, message)));
                    }
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
            }
            _ => {}
        }
    }

    fn handle_kademlia_event(
        swarm: &mut Swarm<CheckBehaviour>,
        state: &mut NodeState,
        event: kad::Event,
    ) {
        match event {
            kad::Event::OutboundQueryProgressed {
                id, result, step, ..
            } => match result {
                kad::QueryResult::GetClosestPeers(result) => {
                    let peers = match result {
                        Ok(ok) => Ok(ok.peers),
                        Err(kad::GetClosestPeersError::Timeout { peers, .. })
                            if !peers.is_empty() =>
                        {
                            Ok(peers)
                        }
                        Err(e) => Err(anyhow!("Kademlia query failed: {}", e)),
                    };

                    if let Ok(peers) = &peers {
                        for peer in peers {
                            let addrs = filter_dialable(&peer.addrs, state.allow_private_addrs);
                            state.address_book.add(peer.peer_id, addrs);
                        }
                    }

                    if let Some(reply) = state.pending.closest_peers.remove(&id) {
                        let _ = reply
                            .send(peers.map(|peers| peers.into_iter().map(|p| p.peer_id).collect()));
                    } else if let Some((target, reply)) = state.pending.find_peer.remove(&id) {
                        let found = peers.and_then(|peers| {
                            peers
                                .into_iter()
                                .find(|p| p.peer_id == target && !p.addrs.is_empty())
                                .map(|p| AddrInfo::new(target, p.addrs))
                                .ok_or_else(|| anyhow!("routing: not found"))
                        });
                        let _ = reply.send(found);
                    }
                }
                kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                    providers,
                    ..
                })) => {
                    Self::forward_providers(swarm, state, id, providers);
                    if step.last {
                        state.pending.providers.remove(&id);
                    }
                }
                kad::QueryResult::GetProviders(Ok(
                    kad::GetProvidersOk::FinishedWithNoAdditionalRecord { .. },
                )) => {
                    state.pending.providers.remove(&id);
                }
                kad::QueryResult::GetProviders(Err(e)) => {
                    debug!("Provider query failed: {}", e);
                    state.pending.providers.remove(&id);
                }
                kad::QueryResult::Bootstrap(result) => {
                    if step.last {
                        match result {
                            Ok(_) => info!("Kademlia bootstrap finished"),
                            Err(e) => warn!("Kademlia bootstrap finished with error: {}", e),
                        }
                        state.bootstrapped = true;
                        Self::update_readiness(swarm, state);
                    }
                }
                _ => {}
            },
            kad::Event::RoutingUpdated { peer, .. } => {
                debug!("Kademlia routing updated for peer: {}", peer);
                Self::update_readiness(swarm, state);
            }
            _ => {}
        }
    }

    /// Push newly seen providers into the caller's stream. Finishes the query
    /// once the caller went away or the limit is reached.
    fn forward_providers(
        swarm: &mut Swarm<CheckBehaviour>,
        state: &mut NodeState,
        id: kad::QueryId,
        providers: HashSet<PeerId>,
    ) {
        let Some(query) = state.pending.providers.get_mut(&id) else {
            return;
        };

        let mut finished = false;
        for peer in providers {
            if query.offer(AddrInfo::new(peer, state.address_book.get(&peer))) {
                finished = true;
                break;
            }
        }

        if finished {
            state.pending.providers.remove(&id);
            if let Some(mut query) = swarm.behaviour_mut().kademlia.query_mut(&id) {
                query.finish();
            }
        }
    }

    fn handle_identify_event(
        swarm: &mut Swarm<CheckBehaviour>,
        state: &mut NodeState,
        event: identify::Event,
    ) {
        if let identify::Event::Received { peer_id, info, .. } = event {
            debug!(
                "Identified peer {}: {} with {} addresses",
                peer_id,
                info.agent_version,
                info.listen_addrs.len()
            );

            let addrs = filter_dialable(&info.listen_addrs, state.allow_private_addrs);
            if info.protocols.contains(&state.kad_protocol) {
                for addr in &addrs {
                    swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                }
            }
            state.address_book.add(peer_id, addrs);
        }
    }

    fn update_readiness(swarm: &mut Swarm<CheckBehaviour>, state: &mut NodeState) {
        if !state.bootstrapped || state.ready.load(Ordering::Acquire) {
            return;
        }
        let size = routing_table_size(swarm);
        if size >= state.ready_min_peers {
            info!("Routing table ready with {} peers", size);
            state.ready.store(true, Ordering::Release);
        }
    }
}

fn routing_table_size(swarm: &mut Swarm<CheckBehaviour>) -> usize {
    swarm
        .behaviour_mut()
        .kademlia
        .kbuckets()
        .map(|bucket| bucket.num_entries())
        .sum()
}

#[async_trait]
impl RoutingLayer for Libp2pNetwork {
    async fn get_closest_peers(&self, target: PeerId) -> Result<Vec<PeerId>> {
        let (tx, rx) = oneshot::channel();
        self.send_command(SwarmCommand::GetClosestPeers { target, reply: tx })
            .await?;
        rx.await
            .map_err(|_| anyhow!("Failed to receive response"))?
    }

    async fn query_closest_peers_rpc(
        &self,
        peer: PeerId,
        target: PeerId,
    ) -> Result<Vec<AddrInfo>> {
        self.connect(peer).await?;

        let mut stream = self
            .control
            .clone()
            .open_stream(peer, self.kad_protocol.clone())
            .await
            .map_err(|e| anyhow!("Failed to open kad stream to {}: {}", peer, e))?;

        write_message(&mut stream, &KadMessage::find_node(&target)).await?;
        let response: KadMessage = read_message(&mut stream).await?;
        let _ = stream.close().await;

        Ok(response.closer_peer_infos())
    }

    /// Kademlia only surfaces provider identities, so each provider carries
    /// whatever addresses the node already learned for it through lookups or
    /// identify. Providers never seen before come back identity-only.
    async fn find_providers_stream(&self, cid: &Cid, limit: usize) -> Result<ProviderStream> {
        let key = kad::RecordKey::new(&cid.hash().to_bytes());
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send_command(SwarmCommand::GetProviders {
            key,
            limit,
            results: results_tx,
            reply: reply_tx,
        })
        .await?;
        let id = reply_rx
            .await
            .map_err(|_| anyhow!("Failed to receive response"))?;

        let command_tx = self.command_tx.clone();
        let stream = futures::stream::poll_fn(move |cx| results_rx.poll_recv(cx));

        Ok(ProviderStream::with_cancel(stream, move || {
            let _ = command_tx.try_send(SwarmCommand::CancelQuery { id });
        }))
    }

    async fn find_peer(&self, peer: PeerId) -> Result<AddrInfo> {
        let (tx, rx) = oneshot::channel();
        self.send_command(SwarmCommand::FindPeer { peer, reply: tx })
            .await?;
        rx.await
            .map_err(|_| anyhow!("Failed to receive response"))?
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> Libp2pNetworkConfig {
        Libp2pNetworkConfig {
            listen_addrs: vec!["/ip4/127.0.0.1/tcp/0".parse().unwrap()],
            bootstrap_nodes: vec![],
            ready_min_peers: 0,
            allow_private_addrs: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_bootstrap_addr() {
        let (peer, addr) = parse_bootstrap_addr(
            "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
        )
        .unwrap();

        assert_eq!(
            peer.to_string(),
            "QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ"
        );
        assert_eq!(addr.to_string(), "/ip4/104.131.131.82/tcp/4001");

        assert!(parse_bootstrap_addr("/ip4/1.2.3.4/tcp/4001").is_err());
        assert!(parse_bootstrap_addr("garbage").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Libp2pNetworkConfig::default();
        assert_eq!(config.bootstrap_nodes.len(), DEFAULT_BOOTSTRAP_NODES.len());
        assert_eq!(config.listen_addrs.len(), 2);
        assert_eq!(config.kad_protocol, KAD_PROTOCOL);
        assert_eq!(config.ready_min_peers, 20);
        assert!(!config.allow_private_addrs);
    }

    #[test]
    fn test_address_book_dedupes() {
        let mut book = AddressBook::default();
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/4001".parse().unwrap();

        book.add(peer, vec![addr.clone(), addr.clone()]);
        book.add(peer, vec![addr.clone()]);
        book.add(peer, vec![]);

        assert_eq!(book.get(&peer), vec![addr]);
        assert!(book.get(&PeerId::random()).is_empty());
    }

    #[test]
    fn test_provider_query_finishes_at_limit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut query = ProviderQuery::new(tx, 2);
        let first = AddrInfo::identity_only(PeerId::random());

        assert!(!query.offer(first.clone()));
        // repeated providers are not forwarded and do not count
        assert!(!query.offer(first.clone()));
        assert!(query.offer(AddrInfo::identity_only(PeerId::random())));

        assert_eq!(rx.try_recv().unwrap(), first);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_provider_query_unbounded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut query = ProviderQuery::new(tx, 0);

        for _ in 0..50 {
            assert!(!query.offer(AddrInfo::identity_only(PeerId::random())));
        }

        let mut forwarded = 0;
        while rx.try_recv().is_ok() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 50);
    }

    #[test]
    fn test_provider_query_finishes_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut query = ProviderQuery::new(tx, 0);
        drop(rx);

        assert!(query.offer(AddrInfo::identity_only(PeerId::random())));
    }

    #[test]
    fn test_provider_query_carries_known_addresses() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut query = ProviderQuery::new(tx, 0);
        let mut book = AddressBook::default();
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/4001".parse().unwrap();
        book.add(peer, vec![addr.clone()]);

        query.offer(AddrInfo::new(peer, book.get(&peer)));

        assert_eq!(rx.try_recv().unwrap().addrs(), &[addr]);
    }

    #[tokio::test]
    async fn test_network_creation() {
        let network = Libp2pNetwork::new(local_config()).await.unwrap();

        assert!(network.is_ready());
        assert_eq!(network.routing_table_size().await, 0);
    }

    #[tokio::test]
    async fn test_not_ready_until_bootstrapped() {
        let config = Libp2pNetworkConfig {
            // nothing listens here, so bootstrap cannot populate the table
            bootstrap_nodes: vec![parse_bootstrap_addr(&format!(
                "/ip4/127.0.0.1/tcp/1/p2p/{}",
                PeerId::random()
            ))
            .unwrap()],
            ready_min_peers: 1,
            ..local_config()
        };

        let network = Libp2pNetwork::new(config).await.unwrap();
        assert!(!network.is_ready());
    }

    #[tokio::test]
    async fn test_rpc_to_unknown_peer_fails() {
        let network = Libp2pNetwork::new(local_config()).await.unwrap();

        let result = network
            .query_closest_peers_rpc(PeerId::random(), PeerId::random())
            .await;

        assert!(result.is_err());
    }
}
