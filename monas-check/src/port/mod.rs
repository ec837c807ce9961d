//! Port layer - Abstract interfaces for infrastructure dependencies
//!
//! The application services only see these traits. The libp2p adapters live in
//! `infrastructure::network`, the mocks in `test_utils`.

pub mod probe_host;
pub mod routing_layer;

pub use probe_host::{ProbeHost, ProbeHostFactory};
pub use routing_layer::{ProviderStream, RoutingLayer};
