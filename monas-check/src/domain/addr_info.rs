//! Peer address information.
//!
//! An [`AddrInfo`] pairs a peer identity with the transport addresses it can be
//! dialled on. It is parsed from a multiaddr ending in `/p2p/<peer-id>`; a bare
//! `/p2p/<peer-id>` yields an identity-only value with no addresses.

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrInfoError {
    #[error("invalid multiaddr: {0}")]
    InvalidMultiaddr(String),
    #[error("invalid p2p multiaddr: missing /p2p/<peer-id> component")]
    MissingPeerId,
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
}

/// A peer identity together with its known addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub peer_id: PeerId,
    addrs: Vec<Multiaddr>,
}

impl AddrInfo {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        let mut info = Self::identity_only(peer_id);
        info.extend_addrs(addrs);
        info
    }

    pub fn identity_only(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            addrs: Vec::new(),
        }
    }

    pub fn addrs(&self) -> &[Multiaddr] {
        &self.addrs
    }

    pub fn has_addrs(&self) -> bool {
        !self.addrs.is_empty()
    }

    /// Append addresses, keeping insertion order and skipping duplicates.
    pub fn extend_addrs<I>(&mut self, addrs: I)
    where
        I: IntoIterator<Item = Multiaddr>,
    {
        for addr in addrs {
            let addr = strip_peer_id(addr);
            if !self.addrs.contains(&addr) {
                self.addrs.push(addr);
            }
        }
    }

    /// Addresses with the `/p2p/<peer-id>` suffix attached.
    pub fn p2p_addrs(&self) -> Vec<Multiaddr> {
        if self.addrs.is_empty() {
            return vec![Multiaddr::empty().with(Protocol::P2p(self.peer_id))];
        }
        self.addrs
            .iter()
            .map(|addr| addr.clone().with(Protocol::P2p(self.peer_id)))
            .collect()
    }

    /// Parse a single `/.../p2p/<peer-id>` multiaddr.
    pub fn from_p2p_addr(addr: Multiaddr) -> Result<Self, AddrInfoError> {
        let mut transport = addr;
        match transport.pop() {
            Some(Protocol::P2p(peer_id)) => {
                let mut info = Self::identity_only(peer_id);
                if !transport.is_empty() {
                    info.addrs.push(transport);
                }
                Ok(info)
            }
            _ => Err(AddrInfoError::MissingPeerId),
        }
    }

    /// Merge a list of `/p2p`-suffixed multiaddrs that all name the same peer.
    pub fn from_p2p_addrs<I>(addrs: I) -> Result<Self, AddrInfoError>
    where
        I: IntoIterator<Item = Multiaddr>,
    {
        let mut merged: Option<AddrInfo> = None;
        for addr in addrs {
            let info = Self::from_p2p_addr(addr)?;
            match merged.as_mut() {
                None => merged = Some(info),
                Some(existing) if existing.peer_id == info.peer_id => {
                    existing.extend_addrs(info.addrs)
                }
                Some(_) => {
                    return Err(AddrInfoError::InvalidMultiaddr(
                        "addresses refer to different peers".to_string(),
                    ))
                }
            }
        }
        merged.ok_or(AddrInfoError::MissingPeerId)
    }
}

fn strip_peer_id(mut addr: Multiaddr) -> Multiaddr {
    if matches!(addr.iter().last(), Some(Protocol::P2p(_))) {
        addr.pop();
    }
    addr
}

impl FromStr for AddrInfo {
    type Err = AddrInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr = Multiaddr::from_str(s.trim())
            .map_err(|e| AddrInfoError::InvalidMultiaddr(e.to_string()))?;
        Self::from_p2p_addr(addr)
    }
}

impl fmt::Display for AddrInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: [", self.peer_id)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", addr)?;
        }
        write!(f, "]}}")
    }
}

/// JSON shape shared with other IPFS tooling.
#[derive(Serialize, Deserialize)]
struct AddrInfoJson {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Addrs", default)]
    addrs: Vec<String>,
}

impl Serialize for AddrInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AddrInfoJson {
            id: self.peer_id.to_string(),
            addrs: self.addrs.iter().map(|a| a.to_string()).collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AddrInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = AddrInfoJson::deserialize(deserializer)?;
        let peer_id = PeerId::from_str(&json.id)
            .map_err(|e| serde::de::Error::custom(AddrInfoError::InvalidPeerId(e.to_string())))?;
        let addrs = json
            .addrs
            .iter()
            .map(|a| Multiaddr::from_str(a))
            .collect::<Result<Vec<_>, _>>()
            .map_err(serde::de::Error::custom)?;
        Ok(AddrInfo::new(peer_id, addrs))
    }
}
