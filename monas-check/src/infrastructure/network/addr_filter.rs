//! Filter for addresses that are not reachable from the public internet.
//!
//! Loopback, private, link-local, CGNAT and similar ranges are neither dialled
//! nor added to the routing table unless private addresses are explicitly
//! allowed.

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Whether `addr` points somewhere publicly routable.
///
/// DNS names count as public, except for `localhost`.
pub fn is_public_addr(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => is_public_ipv4(&ip),
        Some(Protocol::Ip6(ip)) => is_public_ipv6(&ip),
        Some(
            Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) | Protocol::Dnsaddr(name),
        ) => !is_localhost_name(&name),
        _ => false,
    }
}

/// Keep only the addresses that may be dialled.
pub fn filter_dialable<'a, I>(addrs: I, allow_private: bool) -> Vec<Multiaddr>
where
    I: IntoIterator<Item = &'a Multiaddr>,
{
    addrs
        .into_iter()
        .filter(|addr| allow_private || is_public_addr(addr))
        .cloned()
        .collect()
}

fn is_public_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (b & 0xc0) == 64;

    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || shared)
}

fn is_public_ipv6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_ipv4(&v4);
    }
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;

    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}

fn is_localhost_name(name: &str) -> bool {
    let name = name.trim_end_matches('.');
    name.eq_ignore_ascii_case("localhost") || name.to_ascii_lowercase().ends_with(".localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public(s: &str) -> bool {
        is_public_addr(&s.parse().unwrap())
    }

    #[test]
    fn test_public_addresses() {
        assert!(public("/ip4/1.2.3.4/tcp/4001"));
        assert!(public("/ip4/147.75.83.83/udp/4001/quic-v1"));
        assert!(public("/ip6/2604:1380:4642:6600::3/tcp/4001"));
        assert!(public("/dnsaddr/bootstrap.libp2p.io"));
        assert!(public("/dns4/example.com/tcp/443/wss"));
    }

    #[test]
    fn test_private_addresses() {
        assert!(!public("/ip4/127.0.0.1/tcp/4001"));
        assert!(!public("/ip4/10.0.0.5/tcp/4001"));
        assert!(!public("/ip4/192.168.1.10/udp/4001/quic-v1"));
        assert!(!public("/ip4/172.16.3.1/tcp/4001"));
        assert!(!public("/ip4/169.254.1.1/tcp/4001"));
        assert!(!public("/ip4/100.64.0.1/tcp/4001"));
        assert!(!public("/ip4/0.0.0.0/tcp/4001"));
        assert!(!public("/ip6/::1/tcp/4001"));
        assert!(!public("/ip6/fd00::1/tcp/4001"));
        assert!(!public("/ip6/fe80::1/tcp/4001"));
        assert!(!public("/ip6/::ffff:192.168.0.1/tcp/4001"));
        assert!(!public("/dns4/localhost/tcp/4001"));
    }

    #[test]
    fn test_cgnat_boundaries() {
        assert!(public("/ip4/100.63.255.255/tcp/4001"));
        assert!(!public("/ip4/100.127.255.255/tcp/4001"));
        assert!(public("/ip4/100.128.0.0/tcp/4001"));
    }

    #[test]
    fn test_filter_dialable() {
        let addrs: Vec<Multiaddr> = vec![
            "/ip4/127.0.0.1/tcp/4001".parse().unwrap(),
            "/ip4/1.2.3.4/tcp/4001".parse().unwrap(),
        ];

        assert_eq!(filter_dialable(&addrs, false), vec![addrs[1].clone()]);
        assert_eq!(filter_dialable(&addrs, true), addrs);
    }
}
