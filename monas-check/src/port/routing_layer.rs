//! RoutingLayer trait - Abstract interface for DHT lookups

use crate::domain::addr_info::AddrInfo;
use anyhow::Result;
use async_trait::async_trait;
use cid::Cid;
use futures::stream::{BoxStream, Stream, StreamExt};
use libp2p::PeerId;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Lazily produced provider records for one CID.
///
/// Dropping the stream (or calling [`ProviderStream::cancel`]) stops the
/// underlying routing query.
pub struct ProviderStream {
    inner: BoxStream<'static, AddrInfo>,
    on_cancel: Option<CancelFn>,
}

impl ProviderStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = AddrInfo> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            on_cancel: None,
        }
    }

    pub fn with_cancel<S, C>(stream: S, on_cancel: C) -> Self
    where
        S: Stream<Item = AddrInfo> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Stop the upstream query. Calling it more than once is a no-op.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.on_cancel.take() {
            cancel();
        }
    }
}

impl Stream for ProviderStream {
    type Item = AddrInfo;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for ProviderStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for ProviderStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStream")
            .field("cancelled", &self.on_cancel.is_none())
            .finish()
    }
}

/// Abstract interface for the routing layer (Kademlia DHT).
///
/// Used by:
/// - the closest-peer resolver (`get_closest_peers` + `query_closest_peers_rpc`)
/// - the provider-record checker (`find_providers_stream`)
/// - the standalone `/find` and `/find-peer` lookups
#[async_trait]
pub trait RoutingLayer: Send + Sync {
    /// Find the peers closest to `target` in XOR distance.
    ///
    /// Uses Kademlia's GetClosestPeers query.
    async fn get_closest_peers(&self, target: PeerId) -> Result<Vec<PeerId>>;

    /// Send a single FIND_NODE request to `peer` and return the records it
    /// answered with.
    async fn query_closest_peers_rpc(&self, peer: PeerId, target: PeerId)
        -> Result<Vec<AddrInfo>>;

    /// Start a provider search for `cid`. A `limit` of 0 means unbounded.
    ///
    /// Providers may come back without addresses when the implementation
    /// has not learned any for them.
    async fn find_providers_stream(&self, cid: &Cid, limit: usize) -> Result<ProviderStream>;

    /// Look up the addresses of a single peer.
    async fn find_peer(&self, peer: PeerId) -> Result<AddrInfo>;

    /// Collect up to `limit` providers for `cid` until the search ends or
    /// `timeout` elapses. A `limit` of 0 means unbounded.
    async fn find_providers(
        &self,
        cid: &Cid,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<AddrInfo>> {
        let mut stream = self.find_providers_stream(cid, limit).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut providers = Vec::new();

        while let Ok(Some(provider)) = tokio::time::timeout_at(deadline, stream.next()).await {
            providers.push(provider);
            if providers.len() == limit {
                stream.cancel();
                break;
            }
        }

        Ok(providers)
    }

    /// Whether the routing table is populated enough to answer queries.
    fn is_ready(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::random_peer_id;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_provider_stream_cancels_once_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let peer = AddrInfo::identity_only(random_peer_id());

        let mut stream = ProviderStream::with_cancel(futures::stream::iter(vec![peer.clone()]), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(stream.next().await, Some(peer));
        stream.cancel();
        drop(stream);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_stream_without_cancel() {
        let stream = ProviderStream::new(futures::stream::empty());
        let collected: Vec<AddrInfo> = stream.collect().await;
        assert!(collected.is_empty());
    }
}
