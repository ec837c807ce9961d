//! Probe host traits - short-lived hosts used to dial a target and ask it for
//! a block.

use crate::domain::addr_info::AddrInfo;
use crate::domain::report::AvailabilityResult;
use anyhow::Result;
use async_trait::async_trait;
use cid::Cid;
use std::time::Duration;

/// Creates a fresh probe host per check.
///
/// Each host has its own identity, so the remote peer cannot answer from
/// state it holds about the long-running routing node.
#[async_trait]
pub trait ProbeHostFactory: Send + Sync {
    type Host: ProbeHost + 'static;

    async fn create(&self) -> Result<Self::Host>;
}

/// A host scoped to one check. Resources are released when it is dropped.
#[async_trait]
pub trait ProbeHost: Send + Sync {
    /// Dial `target` on any of its addresses.
    async fn connect(&self, target: &AddrInfo, timeout: Duration) -> Result<()>;

    /// Ask `target` whether it has `cid`, using a Bitswap want-have.
    ///
    /// Never fails; problems end up in [`AvailabilityResult::error`].
    async fn check_availability(
        &self,
        cid: &Cid,
        target: &AddrInfo,
        timeout: Duration,
    ) -> AvailabilityResult;
}
