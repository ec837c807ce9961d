//! Test utilities and mock implementations for unit testing.
//!
//! This module provides mock implementations of the routing layer and the
//! probe host factory so the check pipeline can be tested without a network.

use crate::domain::addr_info::AddrInfo;
use crate::domain::report::AvailabilityResult;
use crate::port::probe_host::{ProbeHost, ProbeHostFactory};
use crate::port::routing_layer::{ProviderStream, RoutingLayer};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cid::Cid;
use libp2p::PeerId;
use multihash_codetable::{Code, MultihashDigest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Raw codec, as used by `ipfs add --raw-leaves`.
const RAW_CODEC: u64 = 0x55;

pub fn random_peer_id() -> PeerId {
    PeerId::random()
}

/// A CIDv1 over random bytes.
pub fn random_cid() -> Cid {
    let data: [u8; 32] = rand::random();
    Cid::new_v1(RAW_CODEC, Code::Sha2_256.digest(&data))
}

// ============================================================================
// MockRoutingLayer
// ============================================================================

/// Scripted answer of one peer to a FIND_NODE request.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    result: Result<Vec<AddrInfo>, String>,
    delay: Option<Duration>,
}

impl RpcResponse {
    pub fn records(records: Vec<AddrInfo>) -> Self {
        Self {
            result: Ok(records),
            delay: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            delay: None,
        }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }
}

/// Mock implementation of RoutingLayer for testing.
///
/// Unconfigured peers fail their FIND_NODE request. Calls without a delay
/// complete on their first poll.
pub struct MockRoutingLayer {
    closest_peers: Vec<PeerId>,
    closest_peers_error: Option<String>,
    rpc_responses: HashMap<PeerId, RpcResponse>,
    rpc_calls: AtomicUsize,
    providers: Vec<AddrInfo>,
    providers_error: Option<String>,
    pending_provider_stream: bool,
    provider_search_cancelled: Arc<AtomicBool>,
    find_peer: Option<AddrInfo>,
    find_peer_delay: Option<Duration>,
}

impl Default for MockRoutingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRoutingLayer {
    pub fn new() -> Self {
        Self {
            closest_peers: Vec::new(),
            closest_peers_error: None,
            rpc_responses: HashMap::new(),
            rpc_calls: AtomicUsize::new(0),
            providers: Vec::new(),
            providers_error: None,
            pending_provider_stream: false,
            provider_search_cancelled: Arc::new(AtomicBool::new(false)),
            find_peer: None,
            find_peer_delay: None,
        }
    }

    pub fn with_closest_peers(self, peers: Vec<PeerId>) -> Self {
        Self {
            closest_peers: peers,
            ..self
        }
    }

    pub fn with_closest_peers_error(self, message: &str) -> Self {
        Self {
            closest_peers_error: Some(message.to_string()),
            ..self
        }
    }

    pub fn with_rpc_response(mut self, peer: PeerId, response: RpcResponse) -> Self {
        self.rpc_responses.insert(peer, response);
        self
    }

    pub fn with_providers(self, providers: Vec<AddrInfo>) -> Self {
        Self { providers, ..self }
    }

    pub fn with_providers_error(self, message: &str) -> Self {
        Self {
            providers_error: Some(message.to_string()),
            ..self
        }
    }

    /// Keep the provider stream open after the scripted providers, like a
    /// DHT walk that has not finished yet.
    pub fn with_pending_provider_stream(self) -> Self {
        Self {
            pending_provider_stream: true,
            ..self
        }
    }

    pub fn with_find_peer(self, info: AddrInfo) -> Self {
        Self {
            find_peer: Some(info),
            ..self
        }
    }

    pub fn with_find_peer_delay(self, delay: Duration) -> Self {
        Self {
            find_peer_delay: Some(delay),
            ..self
        }
    }

    /// Number of FIND_NODE requests sent so far.
    pub fn rpc_calls(&self) -> usize {
        self.rpc_calls.load(Ordering::SeqCst)
    }

    /// Whether the last provider stream was cancelled or dropped.
    pub fn provider_search_cancelled(&self) -> bool {
        self.provider_search_cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoutingLayer for MockRoutingLayer {
    async fn get_closest_peers(&self, _target: PeerId) -> Result<Vec<PeerId>> {
        match &self.closest_peers_error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self.closest_peers.clone()),
        }
    }

    async fn query_closest_peers_rpc(
        &self,
        peer: PeerId,
        _target: PeerId,
    ) -> Result<Vec<AddrInfo>> {
        self.rpc_calls.fetch_add(1, Ordering::SeqCst);

        let Some(response) = self.rpc_responses.get(&peer) else {
            return Err(anyhow!("no route to peer {}", peer));
        };
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        response.result.clone().map_err(|message| anyhow!("{}", message))
    }

    async fn find_providers_stream(&self, _cid: &Cid, limit: usize) -> Result<ProviderStream> {
        if let Some(message) = &self.providers_error {
            return Err(anyhow!("{}", message));
        }

        self.provider_search_cancelled.store(false, Ordering::SeqCst);
        let cancelled = self.provider_search_cancelled.clone();
        let on_cancel = move || cancelled.store(true, Ordering::SeqCst);

        let mut providers = self.providers.clone();
        if limit > 0 {
            providers.truncate(limit);
        }
        let providers = futures::stream::iter(providers);
        if self.pending_provider_stream {
            Ok(ProviderStream::with_cancel(
                futures::StreamExt::chain(providers, futures::stream::pending()),
                on_cancel,
            ))
        } else {
            Ok(ProviderStream::with_cancel(providers, on_cancel))
        }
    }

    async fn find_peer(&self, _peer: PeerId) -> Result<AddrInfo> {
        if let Some(delay) = self.find_peer_delay {
            tokio::time::sleep(delay).await;
        }
        self.find_peer
            .clone()
            .ok_or_else(|| anyhow!("routing: not found"))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

// ============================================================================
// MockProbeHostFactory
// ============================================================================

#[derive(Default)]
struct ProbeRecord {
    created: AtomicUsize,
    released: AtomicUsize,
    probes: AtomicUsize,
    dialed: Mutex<Vec<AddrInfo>>,
}

/// Mock implementation of ProbeHostFactory for testing.
///
/// Hosts connect successfully and report the block as found unless told
/// otherwise.
#[derive(Clone)]
pub struct MockProbeHostFactory {
    create_error: Option<String>,
    connect_error: Option<String>,
    availability: AvailabilityResult,
    record: Arc<ProbeRecord>,
}

impl Default for MockProbeHostFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProbeHostFactory {
    pub fn new() -> Self {
        Self {
            create_error: None,
            connect_error: None,
            availability: AvailabilityResult::found(),
            record: Arc::new(ProbeRecord::default()),
        }
    }

    pub fn with_create_error(self, message: &str) -> Self {
        Self {
            create_error: Some(message.to_string()),
            ..self
        }
    }

    pub fn with_connect_error(self, message: &str) -> Self {
        Self {
            connect_error: Some(message.to_string()),
            ..self
        }
    }

    pub fn with_availability(self, availability: AvailabilityResult) -> Self {
        Self {
            availability,
            ..self
        }
    }

    /// Hosts created so far.
    pub fn created(&self) -> usize {
        self.record.created.load(Ordering::SeqCst)
    }

    /// Hosts dropped so far.
    pub fn released(&self) -> usize {
        self.record.released.load(Ordering::SeqCst)
    }

    /// Availability probes sent so far.
    pub fn probes(&self) -> usize {
        self.record.probes.load(Ordering::SeqCst)
    }

    /// Targets passed to `connect`, in order.
    pub fn dialed(&self) -> Vec<AddrInfo> {
        self.record
            .dialed
            .lock()
            .map(|dialed| dialed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProbeHostFactory for MockProbeHostFactory {
    type Host = MockProbeHost;

    async fn create(&self) -> Result<MockProbeHost> {
        if let Some(message) = &self.create_error {
            return Err(anyhow!("{}", message));
        }
        self.record.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockProbeHost {
            connect_error: self.connect_error.clone(),
            availability: self.availability.clone(),
            record: self.record.clone(),
        })
    }
}

pub struct MockProbeHost {
    connect_error: Option<String>,
    availability: AvailabilityResult,
    record: Arc<ProbeRecord>,
}

impl Drop for MockProbeHost {
    fn drop(&mut self) {
        self.record.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProbeHost for MockProbeHost {
    async fn connect(&self, target: &AddrInfo, _timeout: Duration) -> Result<()> {
        if let Ok(mut dialed) = self.record.dialed.lock() {
            dialed.push(target.clone());
        }
        match &self.connect_error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }

    async fn check_availability(
        &self,
        _cid: &Cid,
        _target: &AddrInfo,
        _timeout: Duration,
    ) -> AvailabilityResult {
        self.record.probes.fetch_add(1, Ordering::SeqCst);
        self.availability.clone()
    }
}
