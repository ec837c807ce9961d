//! Integration tests for the reachability pipeline.
//!
//! These tests drive `CheckService::run_check` end to end against the mock
//! routing layer and probe host factory.

use monas_check::application_service::check_service::{CheckError, CheckService};
use monas_check::domain::addr_info::AddrInfo;
use monas_check::domain::report::{AvailabilityResult, COULD_NOT_CONNECT};
use monas_check::test_utils::{
    random_cid, random_peer_id, MockProbeHostFactory, MockRoutingLayer, RpcResponse,
};
use monas_check::CheckConfig;
use libp2p::{Multiaddr, PeerId};
use std::sync::Arc;

type TestService = CheckService<MockRoutingLayer, MockProbeHostFactory>;

fn addr(s: &str) -> Multiaddr {
    s.parse().unwrap()
}

fn create_service(routing: MockRoutingLayer, factory: MockProbeHostFactory) -> TestService {
    CheckService::new(Arc::new(routing), Arc::new(factory), CheckConfig::default())
}

/// Routing layer where two closest peers both know `target` at `addrs`.
fn routing_knowing(target: PeerId, addrs: Vec<Multiaddr>) -> MockRoutingLayer {
    let (p1, p2) = (random_peer_id(), random_peer_id());
    MockRoutingLayer::new()
        .with_closest_peers(vec![p1, p2])
        .with_rpc_response(
            p1,
            RpcResponse::records(vec![AddrInfo::new(target, addrs.clone())]),
        )
        .with_rpc_response(p2, RpcResponse::records(vec![AddrInfo::new(target, addrs)]))
}

#[tokio::test]
async fn test_healthy_peer_passes_every_check() {
    let target = random_peer_id();
    let public = addr("/ip4/1.2.3.4/tcp/4001");
    let routing = routing_knowing(target, vec![public.clone()])
        .with_providers(vec![AddrInfo::identity_only(target)]);
    let factory = MockProbeHostFactory::new();
    let service = create_service(routing, factory.clone());

    let report = service
        .run_check(AddrInfo::new(target, vec![public.clone()]), random_cid())
        .await
        .unwrap();

    assert!(report.connection_error.is_none());
    assert!(report.cid_in_dht);
    assert_eq!(report.peer_found_in_dht.count(&public.to_string()), 2);
    assert_eq!(report.availability, AvailabilityResult::found());

    assert_eq!(factory.created(), 1);
    assert_eq!(factory.probes(), 1);
    assert_eq!(factory.released(), 1);
}

#[tokio::test]
async fn test_identity_only_target_is_dialled_on_dht_addresses() {
    let target = random_peer_id();
    let a = addr("/ip4/1.2.3.4/tcp/4001");
    let b = addr("/ip4/1.2.3.4/udp/4001/quic-v1");
    let factory = MockProbeHostFactory::new();
    let service = create_service(routing_knowing(target, vec![a.clone(), b.clone()]), factory.clone());

    let report = service
        .run_check(AddrInfo::identity_only(target), random_cid())
        .await
        .unwrap();

    assert!(report.connection_error.is_none());
    assert!(!report.cid_in_dht);

    let dialed = factory.dialed();
    assert_eq!(dialed.len(), 1);
    assert_eq!(dialed[0].peer_id, target);
    assert_eq!(dialed[0].addrs().len(), 2);
    assert!(dialed[0].addrs().contains(&a));
    assert!(dialed[0].addrs().contains(&b));
}

#[tokio::test]
async fn test_unresolvable_identity_only_target_skips_connect_and_probe() {
    let target = random_peer_id();
    let peer = random_peer_id();
    let routing = MockRoutingLayer::new()
        .with_closest_peers(vec![peer])
        .with_rpc_response(peer, RpcResponse::error("connection refused"));
    let factory = MockProbeHostFactory::new();
    let service = create_service(routing, factory.clone());

    let report = service
        .run_check(AddrInfo::identity_only(target), random_cid())
        .await
        .unwrap();

    assert_eq!(
        report.connection_error.as_deref(),
        Some("routing layer query failed")
    );
    assert!(report.peer_found_in_dht.is_empty());
    assert_eq!(report.availability, AvailabilityResult::unreachable());
    assert_eq!(report.availability.error.as_deref(), Some(COULD_NOT_CONNECT));

    assert!(factory.dialed().is_empty());
    assert_eq!(factory.probes(), 0);
    // the host is still created and released
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.released(), 1);
}

#[tokio::test]
async fn test_explicit_addresses_are_dialled_even_when_dht_lookup_fails() {
    let target = random_peer_id();
    let explicit = addr("/ip4/5.6.7.8/tcp/4001");
    let routing = MockRoutingLayer::new().with_closest_peers_error("no peers in table");
    let factory = MockProbeHostFactory::new();
    let service = create_service(routing, factory.clone());

    let report = service
        .run_check(AddrInfo::new(target, vec![explicit.clone()]), random_cid())
        .await
        .unwrap();

    assert!(report.connection_error.is_none());
    assert!(report.peer_found_in_dht.is_empty());
    assert_eq!(factory.dialed()[0].addrs(), &[explicit]);
    assert!(report.availability.found);
}

#[tokio::test]
async fn test_connect_failure_is_reported_and_short_circuits() {
    let target = random_peer_id();
    let public = addr("/ip4/1.2.3.4/tcp/4001");
    let factory = MockProbeHostFactory::new().with_connect_error("dial backoff");
    let service = create_service(routing_knowing(target, vec![public.clone()]), factory.clone());

    let report = service
        .run_check(AddrInfo::new(target, vec![public]), random_cid())
        .await
        .unwrap();

    assert_eq!(report.connection_error.as_deref(), Some("dial backoff"));
    assert_eq!(report.availability, AvailabilityResult::unreachable());
    assert_eq!(factory.probes(), 0);
    assert_eq!(factory.released(), 1);
}

#[tokio::test]
async fn test_peer_without_block_is_reported_as_responded() {
    let target = random_peer_id();
    let public = addr("/ip4/1.2.3.4/tcp/4001");
    let factory = MockProbeHostFactory::new().with_availability(AvailabilityResult::not_found());
    let service = create_service(routing_knowing(target, vec![public.clone()]), factory);

    let report = service
        .run_check(AddrInfo::new(target, vec![public]), random_cid())
        .await
        .unwrap();

    assert!(report.connection_error.is_none());
    assert!(!report.availability.found);
    assert!(report.availability.responded);
    assert!(report.availability.error.is_none());
}

#[tokio::test]
async fn test_provider_record_of_another_peer_does_not_count() {
    let target = random_peer_id();
    let public = addr("/ip4/1.2.3.4/tcp/4001");
    let routing = routing_knowing(target, vec![public.clone()])
        .with_providers(vec![AddrInfo::identity_only(random_peer_id())]);
    let service = create_service(routing, MockProbeHostFactory::new());

    let report = service
        .run_check(AddrInfo::new(target, vec![public]), random_cid())
        .await
        .unwrap();

    assert!(!report.cid_in_dht);
}

#[tokio::test]
async fn test_probe_host_creation_failure_is_a_hard_error() {
    let target = random_peer_id();
    let factory = MockProbeHostFactory::new().with_create_error("no transport");
    let service = create_service(MockRoutingLayer::new(), factory);

    let err = service
        .run_check(AddrInfo::identity_only(target), random_cid())
        .await
        .unwrap_err();

    assert!(matches!(err, CheckError::ProbeHost(_)));
    assert_eq!(err.to_string(), "server error: no transport");
}

#[tokio::test]
async fn test_report_json_shape() {
    let target = random_peer_id();
    let public = addr("/ip4/1.2.3.4/tcp/4001");
    let service = create_service(
        routing_knowing(target, vec![public.clone()]),
        MockProbeHostFactory::new(),
    );

    let report = service
        .run_check(AddrInfo::new(target, vec![public.clone()]), random_cid())
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert!(json.get("ConnectionError").is_none());
    assert_eq!(json["PeerFoundInDHT"][public.to_string()], 2);
    assert_eq!(json["CidInDHT"], false);
    assert_eq!(json["DataAvailableOverBitswap"]["Found"], true);
    assert_eq!(json["DataAvailableOverBitswap"]["Responded"], true);
}
