//! HTTP API for the check service.

use crate::application_service::check_service::{CheckError, CheckService};
use crate::domain::addr_info::AddrInfo;
use crate::domain::report::{DiagnosticReport, FindContentOutput, FindPeerOutput};
use crate::infrastructure::network::{Libp2pNetwork, Libp2pProbeHostFactory};
use crate::port::probe_host::ProbeHostFactory;
use crate::port::routing_layer::RoutingLayer;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cid::Cid;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

/// Application state shared across handlers.
pub type AppState = Arc<CheckService<Libp2pNetwork, Libp2pProbeHostFactory>>;

/// Create the API router.
///
/// Every response, including rejections, allows any origin.
pub fn create_router<R, F>(service: Arc<CheckService<R, F>>) -> Router
where
    R: RoutingLayer + 'static,
    F: ProbeHostFactory + 'static,
{
    Router::new()
        .route("/", get(check::<R, F>))
        .route("/find", get(find_content::<R, F>))
        .route("/find-peer", get(find_peer::<R, F>))
        .with_state(service)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub multiaddr: Option<String>,
    pub cid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FindQuery {
    pub cid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FindPeerQuery {
    pub addr: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing argument")]
    MissingArgument,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Check(#[from] CheckError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingArgument | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Check(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Treat absent and empty query values the same.
fn required(value: Option<String>) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ApiError::MissingArgument)
}

// ============================================================================
// Handlers
// ============================================================================

/// Run the full reachability check for one peer and one CID.
async fn check<R, F>(
    State(service): State<Arc<CheckService<R, F>>>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<DiagnosticReport>, ApiError>
where
    R: RoutingLayer + 'static,
    F: ProbeHostFactory + 'static,
{
    let multiaddr = required(query.multiaddr)?;
    let cid = required(query.cid)?;

    let target =
        AddrInfo::from_str(multiaddr.trim()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let cid = Cid::from_str(cid.trim()).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let report = service.run_check(target, cid).await?;
    Ok(Json(report))
}

/// List the providers of a CID.
async fn find_content<R, F>(
    State(service): State<Arc<CheckService<R, F>>>,
    Query(query): Query<FindQuery>,
) -> Result<Json<FindContentOutput>, ApiError>
where
    R: RoutingLayer + 'static,
    F: ProbeHostFactory + 'static,
{
    let cid = required(query.cid)?;
    Ok(Json(service.find_providers(&cid).await))
}

/// Look up the addresses of a peer.
async fn find_peer<R, F>(
    State(service): State<Arc<CheckService<R, F>>>,
    Query(query): Query<FindPeerQuery>,
) -> Result<Json<FindPeerOutput>, ApiError>
where
    R: RoutingLayer + 'static,
    F: ProbeHostFactory + 'static,
{
    let addr = required(query.addr)?;
    Ok(Json(service.find_peer(addr.trim()).await))
}
