//! Closest-Peer Resolver - asks the peers nearest to a target which addresses
//! they hold for it.

use crate::application_service::fan_out::FanOut;
use crate::domain::addr_info::AddrInfo;
use crate::domain::report::AddressFrequencyMap;
use crate::port::routing_layer::RoutingLayer;
use libp2p::PeerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to find closest peers: {0}")]
    ClosestPeers(String),
    /// None of the closest peers answered the FIND_NODE request.
    #[error("routing layer query failed")]
    RoutingQueryFailed,
}

/// Count how many of `target`'s closest peers report each of its addresses.
///
/// An empty map means the peers answered but none of them knew the target.
pub async fn resolve_addresses<R>(
    routing: Arc<R>,
    target: PeerId,
    fan_out: &FanOut,
) -> Result<AddressFrequencyMap, ResolveError>
where
    R: RoutingLayer + 'static,
{
    let closest = routing
        .get_closest_peers(target)
        .await
        .map_err(|e| ResolveError::ClosestPeers(e.to_string()))?;

    debug!(%target, peers = closest.len(), "querying closest peers for addresses");

    let (results_tx, mut results_rx) = mpsc::channel::<Option<AddrInfo>>(closest.len().max(1));

    let num_success = fan_out
        .execute(closest, |peer| {
            let routing = routing.clone();
            let results_tx = results_tx.clone();
            async move {
                let records = routing
                    .query_closest_peers_rpc(peer, target)
                    .await
                    .inspect_err(|e| debug!(%peer, "FIND_NODE failed: {e}"))?;
                let found = records.into_iter().find(|r| r.peer_id == target);
                // One slot per peer; never blocks.
                let _ = results_tx.try_send(found);
                Ok(())
            }
        })
        .await;
    drop(results_tx);

    if num_success == 0 {
        return Err(ResolveError::RoutingQueryFailed);
    }

    let mut addrs = AddressFrequencyMap::new();
    while let Ok(result) = results_rx.try_recv() {
        if let Some(info) = result {
            addrs.record(&info);
        }
    }

    Ok(addrs)
}
