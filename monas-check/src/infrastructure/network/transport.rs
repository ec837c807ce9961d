//! Transport layer configuration for libp2p.
//!
//! Both the routing node and the probe hosts dial over:
//! - TCP (with DNS resolution) upgraded with Noise and Yamux
//! - QUIC v1, which brings its own encryption and multiplexing

use libp2p::{
    core::{muxing::StreamMuxerBox, transport::Boxed, upgrade},
    dns,
    identity::Keypair,
    noise, quic, tcp, yamux, PeerId, Transport,
};
use std::time::Duration;

/// Handshake timeout for the TCP upgrade.
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(20);

/// Build the combined TCP + QUIC transport.
pub fn build_transport(keypair: &Keypair) -> anyhow::Result<Boxed<(PeerId, StreamMuxerBox)>> {
    let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let dns_tcp = dns::tokio::Transport::system(tcp_transport)?;

    let tcp_upgraded = dns_tcp
        .upgrade(upgrade::Version::V1)
        .authenticate(noise::Config::new(keypair)?)
        .multiplex(yamux::Config::default())
        .timeout(UPGRADE_TIMEOUT);

    let quic_transport = quic::tokio::Transport::new(quic::Config::new(keypair));

    let transport = tcp_upgraded
        .or_transport(quic_transport)
        .map(|either, _| match either {
            futures::future::Either::Left((peer_id, muxer)) => {
                (peer_id, StreamMuxerBox::new(muxer))
            }
            futures::future::Either::Right((peer_id, muxer)) => {
                (peer_id, StreamMuxerBox::new(muxer))
            }
        })
        .boxed();

    Ok(transport)
}

/// Build a TCP-only transport for tests.
pub fn build_tcp_transport(keypair: &Keypair) -> anyhow::Result<Boxed<(PeerId, StreamMuxerBox)>> {
    let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let dns_tcp = dns::tokio::Transport::system(tcp_transport)?;

    let transport = dns_tcp
        .upgrade(upgrade::Version::V1)
        .authenticate(noise::Config::new(keypair)?)
        .multiplex(yamux::Config::default())
        .timeout(UPGRADE_TIMEOUT)
        .boxed();

    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_transport() {
        let keypair = Keypair::generate_ed25519();
        assert!(build_transport(&keypair).is_ok());
    }

    #[test]
    fn test_build_tcp_transport() {
        let keypair = Keypair::generate_ed25519();
        assert!(build_tcp_transport(&keypair).is_ok());
    }
}
