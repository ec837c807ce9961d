//! Short-lived libp2p hosts used to dial a target and probe it over Bitswap.
//!
//! Every check gets a fresh identity and swarm so the target cannot answer
//! from state tied to the long-running routing node. Bitswap answers arrive
//! on streams the target opens back to us, so each host accepts inbound
//! `/ipfs/bitswap/1.2.0` streams and fans the decoded messages out to the
//! probes waiting on them.

use super::addr_filter::filter_dialable;
use super::behaviour::{ProbeBehaviour, ProbeBehaviourEvent};
use super::protocol::{read_message, write_message, BitswapMessage, BITSWAP_PROTOCOL};
use super::transport;
use crate::domain::addr_info::AddrInfo;
use crate::domain::report::AvailabilityResult;
use crate::port::probe_host::{ProbeHost, ProbeHostFactory};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cid::Cid;
use futures::{AsyncWriteExt, StreamExt};
use libp2p::{
    identity::Keypair,
    swarm::{dial_opts::DialOpts, DialError, SwarmEvent},
    Multiaddr, PeerId, Swarm,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Buffered inbound Bitswap messages per host.
const INBOUND_CAPACITY: usize = 64;

/// Creates one [`Libp2pProbeHost`] per check.
#[derive(Debug, Clone, Default)]
pub struct Libp2pProbeHostFactory {
    allow_private_addrs: bool,
}

impl Libp2pProbeHostFactory {
    pub fn new(allow_private_addrs: bool) -> Self {
        Self {
            allow_private_addrs,
        }
    }
}

#[async_trait]
impl ProbeHostFactory for Libp2pProbeHostFactory {
    type Host = Libp2pProbeHost;

    async fn create(&self) -> Result<Libp2pProbeHost> {
        Libp2pProbeHost::spawn(self.allow_private_addrs)
    }
}

enum ProbeCommand {
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<()>>,
    },
}

pub struct Libp2pProbeHost {
    local_peer_id: PeerId,
    command_tx: mpsc::Sender<ProbeCommand>,
    control: libp2p_stream::Control,
    inbound: broadcast::Sender<(PeerId, BitswapMessage)>,
    allow_private_addrs: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl Libp2pProbeHost {
    /// Build a host with a fresh ed25519 identity and start its swarm.
    pub fn spawn(allow_private_addrs: bool) -> Result<Self> {
        let keypair = Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        let transport =
            transport::build_transport(&keypair).context("Failed to build transport")?;
        let behaviour = ProbeBehaviour::new(&keypair);
        let swarm_config = libp2p::swarm::Config::with_tokio_executor()
            .with_idle_connection_timeout(Duration::from_secs(60));
        let swarm = Swarm::new(transport, behaviour, local_peer_id, swarm_config);

        let mut control = swarm.behaviour().stream.new_control();
        let incoming = control
            .accept(BITSWAP_PROTOCOL)
            .map_err(|e| anyhow!("Failed to accept bitswap streams: {:?}", e))?;

        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(16);

        let tasks = vec![
            tokio::spawn(Self::run_swarm_loop(swarm, command_rx)),
            tokio::spawn(Self::accept_bitswap(incoming, inbound.clone())),
        ];

        debug!("Probe host {} started", local_peer_id);

        Ok(Self {
            local_peer_id,
            command_tx,
            control,
            inbound,
            allow_private_addrs,
            tasks,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn run_swarm_loop(
        mut swarm: Swarm<ProbeBehaviour>,
        mut command_rx: mpsc::Receiver<ProbeCommand>,
    ) {
        let mut pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<()>>>> = HashMap::new();

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(ProbeCommand::Dial { peer, addrs, reply }) => {
                        if swarm.is_connected(&peer) {
                            let _ = reply.send(Ok(()));
                        } else {
                            match swarm.dial(DialOpts::peer_id(peer).addresses(addrs).build()) {
                                Ok(()) | Err(DialError::DialPeerConditionFalse(_)) => {
                                    pending_dials.entry(peer).or_default().push(reply);
                                }
                                Err(e) => {
                                    let _ = reply.send(Err(anyhow!("failed to dial {}: {}", peer, e)));
                                }
                            }
                        }
                    }
                    None => break,
                },
                event = swarm.select_next_some() => match event {
                    SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                        debug!("Probe connected to {} at {}", peer_id, endpoint.get_remote_address());
                        for reply in pending_dials.remove(&peer_id).unwrap_or_default() {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    SwarmEvent::OutgoingConnectionError { peer_id: Some(peer_id), error, .. } => {
                        let message = error.to_string();
                        for reply in pending_dials.remove(&peer_id).unwrap_or_default() {
                            let _ = reply.send(Err(anyhow!("failed to dial {}: {}", peer_id, message)));
                        }
                    }
                    SwarmEvent::Behaviour(ProbeBehaviourEvent::Identify(event)) => {
                        debug!("Probe identify event: {:?}", event);
                    }
                    _ => {}
                }
            }
        }
    }

    async fn accept_bitswap(
        mut incoming: libp2p_stream::IncomingStreams,
        inbound: broadcast::Sender<(PeerId, BitswapMessage)>,
    ) {
        while let Some((peer, mut stream)) = incoming.next().await {
            let inbound = inbound.clone();
            tokio::spawn(async move {
                loop {
                    match read_message::<_, BitswapMessage>(&mut stream).await {
                        Ok(message) => {
                            let _ = inbound.send((peer, message));
                        }
                        Err(e) => {
                            debug!("Bitswap stream from {} ended: {:#}", peer, e);
                            break;
                        }
                    }
                }
            });
        }
    }

    /// Send a want-have and wait for the target's answer about `cid`.
    async fn probe(&self, cid: &Cid, peer: PeerId) -> Result<bool> {
        let mut messages = self.inbound.subscribe();

        let mut stream = self
            .control
            .clone()
            .open_stream(peer, BITSWAP_PROTOCOL)
            .await
            .map_err(|e| anyhow!("failed to open bitswap stream: {}", e))?;
        write_message(&mut stream, &BitswapMessage::want_have(cid)).await?;
        let _ = stream.close().await;

        loop {
            match messages.recv().await {
                Ok((from, message)) if from == peer => {
                    if let Some(has_block) = message.presence_of(cid) {
                        return Ok(has_block);
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow!("bitswap receiver stopped"));
                }
            }
        }
    }
}

impl Drop for Libp2pProbeHost {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl ProbeHost for Libp2pProbeHost {
    async fn connect(&self, target: &AddrInfo, timeout: Duration) -> Result<()> {
        let addrs = filter_dialable(target.addrs(), self.allow_private_addrs);
        if addrs.is_empty() {
            return Err(anyhow!("no dialable addresses for {}", target.peer_id));
        }

        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(ProbeCommand::Dial {
                peer: target.peer_id,
                addrs,
                reply: tx,
            })
            .await
            .map_err(|_| anyhow!("Failed to send command"))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("Failed to receive response")),
            Err(_) => Err(anyhow!("dial to {} timed out", target.peer_id)),
        }
    }

    async fn check_availability(
        &self,
        cid: &Cid,
        target: &AddrInfo,
        timeout: Duration,
    ) -> AvailabilityResult {
        match tokio::time::timeout(timeout, self.probe(cid, target.peer_id)).await {
            Ok(Ok(true)) => AvailabilityResult::found(),
            Ok(Ok(false)) => AvailabilityResult::not_found(),
            Ok(Err(e)) => AvailabilityResult::failed(format!("{e:#}")),
            Err(_) => AvailabilityResult::failed("timed out waiting for a bitswap response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::random_peer_id;

    #[tokio::test]
    async fn test_each_host_has_its_own_identity() {
        let factory = Libp2pProbeHostFactory::new(false);
        let a = factory.create().await.unwrap();
        let b = factory.create().await.unwrap();

        assert_ne!(a.local_peer_id(), b.local_peer_id());
    }

    #[tokio::test]
    async fn test_connect_rejects_private_only_target() {
        let host = Libp2pProbeHost::spawn(false).unwrap();
        let target = AddrInfo::new(
            random_peer_id(),
            vec!["/ip4/127.0.0.1/tcp/4001".parse().unwrap()],
        );

        let err = host
            .connect(&target, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no dialable addresses"));
    }

    #[tokio::test]
    async fn test_connect_without_addresses_fails() {
        let host = Libp2pProbeHost::spawn(true).unwrap();
        let target = AddrInfo::identity_only(random_peer_id());

        assert!(host.connect(&target, Duration::from_secs(1)).await.is_err());
    }
}
