//! The control surface: the boundary the planner pushes intent through.
//!
//! The planner computes *what* must exist; a [`ControlSurface`] makes it so.
//! Each method is one boundary operation taking typed parameters. Every
//! call returns an [`Ack`] or an [`ApplyError`]. A surface may block until
//! the switch or host acknowledges, or until its own timeout expires.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use overlay_types::{IpPrefix, MacAddress, PortNo, Vni, VlanId};

use crate::error::ApplyError;
use crate::rule::FlowRule;

/// Boundary operation identifiers, for acks, timeouts and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryOp {
    CreateSwitchPort,
    RemoveSwitchPort,
    InstallFlow,
    RemoveFlow,
    DumpFlows,
    TagVlan,
    UntagVlan,
    SetInterfaceAddress,
    SetDefaultRoute,
    CreateHostVtep,
    RemoveHostVtep,
    SetStaticNeighbor,
    SetStaticFdb,
    SetForwarding,
}

impl BoundaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryOp::CreateSwitchPort => "create-switch-port",
            BoundaryOp::RemoveSwitchPort => "remove-switch-port",
            BoundaryOp::InstallFlow => "install-flow",
            BoundaryOp::RemoveFlow => "remove-flow",
            BoundaryOp::DumpFlows => "dump-flows",
            BoundaryOp::TagVlan => "tag-vlan",
            BoundaryOp::UntagVlan => "untag-vlan",
            BoundaryOp::SetInterfaceAddress => "set-interface-address",
            BoundaryOp::SetDefaultRoute => "set-default-route",
            BoundaryOp::CreateHostVtep => "create-host-vtep",
            BoundaryOp::RemoveHostVtep => "remove-host-vtep",
            BoundaryOp::SetStaticNeighbor => "set-static-neighbor",
            BoundaryOp::SetStaticFdb => "set-static-fdb",
            BoundaryOp::SetForwarding => "set-forwarding",
        }
    }
}

impl fmt::Display for BoundaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgement of a boundary operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub operation: BoundaryOp,
    /// Whatever the surface reported (command output, "dry-run", ...).
    pub detail: String,
}

impl Ack {
    pub fn new(operation: BoundaryOp, detail: impl Into<String>) -> Self {
        Self {
            operation,
            detail: detail.into(),
        }
    }
}

/// How a VTEP picks the VNI it puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelMode {
    /// Statically bound to one VNI for its lifetime.
    Fixed(Vni),
    /// VNI chosen per flow by `set_tunnel`.
    FlowBased,
}

impl TunnelMode {
    pub fn from_vni(vni: Option<Vni>) -> Self {
        match vni {
            Some(vni) => TunnelMode::Fixed(vni),
            None => TunnelMode::FlowBased,
        }
    }

    pub fn fixed_vni(&self) -> Option<Vni> {
        match self {
            TunnelMode::Fixed(vni) => Some(*vni),
            TunnelMode::FlowBased => None,
        }
    }

    /// Value of the interface's `options:key`.
    pub fn key(&self) -> String {
        match self {
            TunnelMode::Fixed(vni) => vni.to_string(),
            TunnelMode::FlowBased => "flow".to_string(),
        }
    }
}

/// Everything needed to attach one VXLAN port to a switch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelPortSpec {
    pub switch: String,
    pub iface: String,
    pub port: PortNo,
    pub remote: IpAddr,
    pub mode: TunnelMode,
}

/// A kernel VXLAN device terminated on a host rather than a switch.
///
/// Learning is off: every remote the device can reach is given to it as a
/// [`StaticNeighbor`] and a [`StaticFdb`] entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostVtepSpec {
    pub host: String,
    /// VXLAN device name, e.g. `vtep1`.
    pub iface: String,
    /// Underlay interface the device sends through.
    pub link: String,
    pub vni: Vni,
    pub mac: MacAddress,
    pub address: IpPrefix,
}

/// Permanent ARP/ND entry on a host VTEP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StaticNeighbor {
    pub host: String,
    pub iface: String,
    /// Overlay address of the remote VTEP.
    pub address: IpAddr,
    pub mac: MacAddress,
}

/// Forwarding database entry sending `mac` to the VTEP at `dst`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StaticFdb {
    pub host: String,
    pub iface: String,
    pub mac: MacAddress,
    /// Underlay address of the remote VTEP.
    pub dst: IpAddr,
    pub vni: Vni,
}

/// Boundary operations the planner requires from the outside world.
#[async_trait]
pub trait ControlSurface: Send {
    /// Returns the surface name (for logging).
    fn name(&self) -> &str;

    /// Attaches a VXLAN tunnel port to a switch.
    async fn create_tunnel_port(&mut self, spec: &TunnelPortSpec) -> Result<Ack, ApplyError>;

    /// Detaches a tunnel port. Removing a port that does not exist succeeds.
    async fn remove_tunnel_port(&mut self, switch: &str, iface: &str) -> Result<Ack, ApplyError>;

    /// Adds a rule to the switch's forwarding table.
    async fn install_flow(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError>;

    /// Removes the rule with exactly this match. Removing an absent rule succeeds.
    async fn remove_flow(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError>;

    /// Reads the switch's forwarding table back.
    async fn dump_flows(&mut self, switch: &str) -> Result<Vec<FlowRule>, ApplyError>;

    /// Creates `<iface>.<vlan>` on the host and makes it the effective interface.
    async fn tag_vlan(&mut self, host: &str, iface: &str, vlan: VlanId)
        -> Result<Ack, ApplyError>;

    /// Deletes the VLAN sub-interface. Deleting an absent one succeeds.
    async fn untag_vlan(
        &mut self,
        host: &str,
        iface: &str,
        vlan: VlanId,
    ) -> Result<Ack, ApplyError>;

    /// Assigns an address to a host interface.
    async fn set_interface_address(
        &mut self,
        host: &str,
        iface: &str,
        address: &IpPrefix,
    ) -> Result<Ack, ApplyError>;

    /// Points the host's default route at `gateway`.
    async fn set_default_route(&mut self, host: &str, gateway: IpAddr)
        -> Result<Ack, ApplyError>;

    /// Creates, addresses and brings up a host VXLAN device.
    async fn create_host_vtep(&mut self, spec: &HostVtepSpec) -> Result<Ack, ApplyError>;

    /// Deletes a host VXLAN device with its neighbor and FDB entries.
    /// Deleting an absent one succeeds.
    async fn remove_host_vtep(&mut self, host: &str, iface: &str) -> Result<Ack, ApplyError>;

    /// Installs or replaces a permanent neighbor entry.
    async fn set_static_neighbor(&mut self, entry: &StaticNeighbor) -> Result<Ack, ApplyError>;

    /// Installs or replaces a static FDB entry.
    async fn set_static_fdb(&mut self, entry: &StaticFdb) -> Result<Ack, ApplyError>;

    /// Turns IPv4 forwarding on a router node on or off.
    async fn set_forwarding(&mut self, node: &str, enabled: bool) -> Result<Ack, ApplyError>;
}
