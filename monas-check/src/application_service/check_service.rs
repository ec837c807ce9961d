//! Check Service - the reachability pipeline and the standalone DHT lookups
//! behind the HTTP API.

use crate::application_service::closest_peers::{resolve_addresses, ResolveError};
use crate::application_service::fan_out::FanOut;
use crate::application_service::provider_record::ProviderRecordChecker;
use crate::config::CheckConfig;
use crate::domain::addr_info::AddrInfo;
use crate::domain::report::{
    AddressFrequencyMap, AvailabilityResult, DiagnosticReport, FindContentOutput, FindPeerOutput,
    NO_PROVIDERS_FOUND,
};
use crate::port::probe_host::{ProbeHost, ProbeHostFactory};
use crate::port::routing_layer::RoutingLayer;
use cid::Cid;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("server error: {0}")]
    ProbeHost(String),
}

/// Runs diagnostics against the shared routing node.
///
/// One instance is created at startup and shared by every request; each check
/// gets its own probe host from the factory.
pub struct CheckService<R, F>
where
    R: RoutingLayer,
    F: ProbeHostFactory,
{
    routing: Arc<R>,
    probe_factory: Arc<F>,
    config: CheckConfig,
    fan_out: FanOut,
    provider_checker: ProviderRecordChecker,
}

impl<R, F> CheckService<R, F>
where
    R: RoutingLayer + 'static,
    F: ProbeHostFactory,
{
    pub fn new(routing: Arc<R>, probe_factory: Arc<F>, config: CheckConfig) -> Self {
        let fan_out = FanOut::from_config(&config.fan_out);
        let provider_checker = ProviderRecordChecker::new(config.provider_search_timeout());
        Self {
            routing,
            probe_factory,
            config,
            fan_out,
            provider_checker,
        }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Check whether `target` is discoverable, reachable and serving `cid`.
    ///
    /// The only hard error is failing to create the probe host; everything
    /// else is reported inside the returned report.
    pub async fn run_check(
        &self,
        mut target: AddrInfo,
        cid: Cid,
    ) -> Result<DiagnosticReport, CheckError> {
        info!(peer = %target, %cid, "Starting check");

        let (cid_in_dht, resolved) = tokio::join!(
            self.provider_checker
                .has_provider_record(self.routing.as_ref(), &cid, target.peer_id),
            resolve_addresses(self.routing.clone(), target.peer_id, &self.fan_out),
        );
        info!(%cid, cid_in_dht, "Done searching CID in DHT");

        let mut report = DiagnosticReport {
            cid_in_dht,
            ..Default::default()
        };
        let resolve_error = match resolved {
            Ok(found) => {
                info!(peer = %target.peer_id, addrs = found.len(), "Done searching peer in DHT");
                report.peer_found_in_dht = found;
                None
            }
            Err(e) => {
                warn!(peer = %target.peer_id, "Peer address lookup failed: {e}");
                Some(e)
            }
        };

        report.connection_error =
            complete_addresses(&mut target, &report.peer_found_in_dht, resolve_error.as_ref());

        let host = self
            .probe_factory
            .create()
            .await
            .map_err(|e| CheckError::ProbeHost(format!("{e:#}")))?;

        if !report.connection_failed() {
            if let Err(e) = host.connect(&target, self.config.dial_timeout()).await {
                report.connection_error = Some(format!("{e:#}"));
            }
        }

        report.availability = if report.connection_failed() {
            AvailabilityResult::unreachable()
        } else {
            host.check_availability(&cid, &target, self.config.availability_timeout())
                .await
        };

        info!(
            peer = %target.peer_id,
            %cid,
            connected = !report.connection_failed(),
            found = report.availability.found,
            "Check finished"
        );
        Ok(report)
    }

    /// `/find-peer`: resolve one peer's addresses through the DHT.
    pub async fn find_peer(&self, addr: &str) -> FindPeerOutput {
        let mut out = FindPeerOutput::default();

        let info = match AddrInfo::from_str(addr) {
            Ok(info) => info,
            Err(e) => {
                out.parse_address_error = Some(e.to_string());
                return out;
            }
        };
        out.id = Some(info.peer_id.to_string());

        match tokio::time::timeout(
            self.config.find_peer_timeout(),
            self.routing.find_peer(info.peer_id),
        )
        .await
        {
            Ok(Ok(found)) => {
                out.addresses = found.addrs().iter().map(ToString::to_string).collect();
            }
            Ok(Err(e)) => out.find_peer_error = Some(format!("{e:#}")),
            Err(_) => out.find_peer_error = Some("routing: find peer timed out".to_string()),
        }

        out
    }

    /// `/find`: list the providers the DHT knows for a CID.
    pub async fn find_providers(&self, cid: &str) -> FindContentOutput {
        let mut out = FindContentOutput::default();

        let cid = match Cid::from_str(cid.trim()) {
            Ok(cid) => cid,
            Err(e) => {
                out.error_parse_cid = Some(e.to_string());
                return out;
            }
        };

        match self
            .routing
            .find_providers(
                &cid,
                self.config.find_providers_limit,
                self.config.find_providers_timeout(),
            )
            .await
        {
            Ok(providers) if providers.is_empty() => {
                out.error_find_providers = Some(NO_PROVIDERS_FOUND.to_string());
            }
            Ok(providers) => out.providers = providers,
            Err(e) => out.error_find_providers = Some(format!("{e:#}")),
        }

        out
    }
}

/// Fill in the addresses of an identity-only target from what the DHT
/// returned.
///
/// Returns the connection error to report when the target had no addresses
/// and the lookup itself failed. Targets that already carry addresses are
/// left untouched.
pub fn complete_addresses(
    target: &mut AddrInfo,
    found: &AddressFrequencyMap,
    resolve_error: Option<&ResolveError>,
) -> Option<String> {
    if target.has_addrs() {
        return None;
    }

    let (addrs, invalid) = found.addresses();
    for addr in invalid {
        warn!(%addr, "error parsing multiaddr from DHT");
    }
    target.extend_addrs(addrs);

    resolve_error.map(ToString::to_string)
}
