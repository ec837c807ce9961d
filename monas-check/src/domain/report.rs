//! Diagnostic report model.
//!
//! Field names follow the JSON produced by the original ipfs-check service so
//! existing web frontends can consume it unchanged.

use super::addr_info::AddrInfo;
use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// Error reported in place of a probe when the peer could not be reached.
pub const COULD_NOT_CONNECT: &str = "could not connect to peer";

/// Error reported by `/find` when the routing layer returned no providers.
pub const NO_PROVIDERS_FOUND: &str = "no providers found";

/// How many independent respondents reported each address of a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressFrequencyMap(BTreeMap<String, usize>);

impl AddressFrequencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one respondent's view of a peer. Repeated addresses in the same
    /// record are only counted once.
    pub fn record(&mut self, info: &AddrInfo) {
        let mut seen = HashSet::new();
        for addr in info.addrs() {
            let key = addr.to_string();
            if seen.insert(key.clone()) {
                *self.0.entry(key).or_insert(0) += 1;
            }
        }
    }

    pub fn count(&self, addr: &str) -> usize {
        self.0.get(addr).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse every key back into a multiaddr. Keys that fail to parse are
    /// returned separately so the caller can log them.
    pub fn addresses(&self) -> (Vec<Multiaddr>, Vec<String>) {
        let mut parsed = Vec::with_capacity(self.0.len());
        let mut invalid = Vec::new();
        for key in self.0.keys() {
            match Multiaddr::from_str(key) {
                Ok(addr) => parsed.push(addr),
                Err(_) => invalid.push(key.clone()),
            }
        }
        (parsed, invalid)
    }
}

/// Outcome of asking a peer for a block over Bitswap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    /// The peer said it has the block, or sent it.
    #[serde(rename = "Found")]
    pub found: bool,
    /// The peer answered at all (either HAVE or DONT_HAVE).
    #[serde(rename = "Responded")]
    pub responded: bool,
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AvailabilityResult {
    pub fn found() -> Self {
        Self {
            found: true,
            responded: true,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            found: false,
            responded: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            found: false,
            responded: false,
            error: Some(error.into()),
        }
    }

    /// Placeholder used when no probe was attempted.
    pub fn unreachable() -> Self {
        Self::failed(COULD_NOT_CONNECT)
    }
}

/// Result of a full reachability check for one peer and one CID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    #[serde(
        rename = "ConnectionError",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_error: Option<String>,
    #[serde(rename = "PeerFoundInDHT")]
    pub peer_found_in_dht: AddressFrequencyMap,
    #[serde(rename = "CidInDHT")]
    pub cid_in_dht: bool,
    #[serde(rename = "DataAvailableOverBitswap")]
    pub availability: AvailabilityResult,
}

impl DiagnosticReport {
    pub fn connection_failed(&self) -> bool {
        self.connection_error.is_some()
    }
}

/// Output of `/find-peer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindPeerOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_address_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_peer_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// Output of `/find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindContentOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_parse_cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_find_providers: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<AddrInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::random_peer_id;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_record_counts_once_per_respondent() {
        let peer = random_peer_id();
        let mut map = AddressFrequencyMap::new();

        map.record(&AddrInfo::new(
            peer,
            vec![addr("/ip4/1.2.3.4/tcp/4001"), addr("/ip4/5.6.7.8/tcp/4001")],
        ));
        map.record(&AddrInfo::new(peer, vec![addr("/ip4/1.2.3.4/tcp/4001")]));

        assert_eq!(map.count("/ip4/1.2.3.4/tcp/4001"), 2);
        assert_eq!(map.count("/ip4/5.6.7.8/tcp/4001"), 1);
        assert_eq!(map.count("/ip4/9.9.9.9/tcp/4001"), 0);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_addresses_parses_keys() {
        let mut map = AddressFrequencyMap::new();
        map.record(&AddrInfo::new(
            random_peer_id(),
            vec![addr("/ip4/1.2.3.4/tcp/4001")],
        ));

        let (parsed, invalid) = map.addresses();
        assert_eq!(parsed, vec![addr("/ip4/1.2.3.4/tcp/4001")]);
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_report_json_omits_absent_fields() {
        let report = DiagnosticReport {
            cid_in_dht: true,
            availability: AvailabilityResult::found(),
            ..Default::default()
        };

        let json = serde_json::to_value(&report).unwrap();
        let obj = json.as_object().unwrap();

        assert!(!obj.contains_key("ConnectionError"));
        assert_eq!(obj["CidInDHT"], true);
        assert!(obj["PeerFoundInDHT"].as_object().unwrap().is_empty());
        assert_eq!(obj["DataAvailableOverBitswap"]["Found"], true);
        assert!(obj["DataAvailableOverBitswap"].get("Error").is_none());
    }

    #[test]
    fn test_unreachable_availability() {
        let result = AvailabilityResult::unreachable();
        assert!(!result.found);
        assert!(!result.responded);
        assert_eq!(result.error.as_deref(), Some(COULD_NOT_CONNECT));
    }

    #[test]
    fn test_lookup_outputs_omit_empty_fields() {
        let out = FindContentOutput {
            error_find_providers: Some(NO_PROVIDERS_FOUND.to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json, serde_json::json!({ "error_find_providers": "no providers found" }));

        let out = FindPeerOutput {
            id: Some("peer".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json, serde_json::json!({ "id": "peer" }));
    }
}
