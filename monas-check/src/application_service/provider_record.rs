//! Provider-Record Checker - is a given peer advertised as a provider of a CID?

use crate::port::routing_layer::RoutingLayer;
use cid::Cid;
use futures::StreamExt;
use libp2p::PeerId;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProviderRecordChecker {
    search_timeout: Duration,
}

impl ProviderRecordChecker {
    pub fn new(search_timeout: Duration) -> Self {
        Self { search_timeout }
    }

    /// Stream provider records for `cid` until one from `target` shows up.
    ///
    /// Returns `false` if the search ends, fails to start, or runs past the
    /// search timeout.
    pub async fn has_provider_record<R>(&self, routing: &R, cid: &Cid, target: PeerId) -> bool
    where
        R: RoutingLayer + ?Sized,
    {
        let mut providers = match routing.find_providers_stream(cid, 0).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(%cid, "provider search failed to start: {e}");
                return false;
            }
        };

        let deadline = tokio::time::Instant::now() + self.search_timeout;
        loop {
            match tokio::time::timeout_at(deadline, providers.next()).await {
                Ok(Some(provider)) if provider.peer_id == target => {
                    providers.cancel();
                    return true;
                }
                Ok(Some(_)) => continue,
                Ok(None) => return false,
                Err(_) => {
                    debug!(%cid, %target, "provider search timed out");
                    return false;
                }
            }
        }
    }
}
