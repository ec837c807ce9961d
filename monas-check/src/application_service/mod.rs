pub mod check_service;
pub mod closest_peers;
pub mod fan_out;
pub mod node;
pub mod provider_record;
