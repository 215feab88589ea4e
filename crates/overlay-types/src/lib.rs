//! Common types for VLAN/VXLAN overlay planning.
//!
//! This crate provides type-safe representations of the primitives the
//! overlay planner passes between its components:
//!
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`Vni`]: 24-bit VXLAN network identifiers
//! - [`PortNo`]: OpenFlow port numbers on a switch
//! - [`IpPrefix`]: interface addresses in CIDR notation
//! - [`MacAddress`]: Ethernet addresses of host VTEPs

mod ip;
mod mac;
mod port;
mod vlan;
mod vni;

pub use ip::IpPrefix;
pub use mac::MacAddress;
pub use port::PortNo;
pub use vlan::VlanId;
pub use vni::Vni;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u32),

    #[error("invalid VNI: {0} (must be 1-16777215)")]
    InvalidVni(u32),

    #[error("invalid port number: {0} (must be 1-65279)")]
    InvalidPortNo(u32),
}
