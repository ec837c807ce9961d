pub mod addr_info;
pub mod report;

pub use addr_info::{AddrInfo, AddrInfoError};
pub use report::{
    AddressFrequencyMap, AvailabilityResult, DiagnosticReport, FindContentOutput, FindPeerOutput,
};
