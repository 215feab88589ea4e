//! Forwarding rules.
//!
//! A [`FlowRule`] is a `(switch, match, action)` triple. `Display` renders
//! the match and action in `ovs-ofctl` flow syntax, so the same text is used
//! for installing, deleting and comparing against dumped flow tables.

use serde::{Deserialize, Serialize};
use std::fmt;

use overlay_types::{PortNo, Vni};

/// Exact match on ingress port and, for decapsulation, on tunnel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowMatch {
    pub in_port: PortNo,
    pub tun_id: Option<Vni>,
}

impl FlowMatch {
    /// Matches everything entering on `in_port`.
    pub fn port(in_port: PortNo) -> Self {
        Self {
            in_port,
            tun_id: None,
        }
    }

    /// Matches traffic arriving on tunnel port `in_port` tagged `vni`.
    pub fn tunnel(in_port: PortNo, vni: Vni) -> Self {
        Self {
            in_port,
            tun_id: Some(vni),
        }
    }
}

impl fmt::Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in_port={}", self.in_port)?;
        if let Some(vni) = self.tun_id {
            write!(f, ",tun_id={}", vni)?;
        }
        Ok(())
    }
}

/// What a switch does with a matched packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    /// Plain port-to-port forwarding.
    Forward(PortNo),
    /// Tag with `vni` and send into tunnel port `port`.
    SetTunnelAndForward { vni: Vni, port: PortNo },
    /// Drop the tunnel id and deliver on a physical port.
    StripTunnelAndForward(PortNo),
}

impl FlowAction {
    pub fn output_port(&self) -> PortNo {
        match self {
            FlowAction::Forward(port) | FlowAction::StripTunnelAndForward(port) => *port,
            FlowAction::SetTunnelAndForward { port, .. } => *port,
        }
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Leaving through a non-tunnel port discards tunnel metadata,
            // so stripping needs no explicit action.
            FlowAction::Forward(port) | FlowAction::StripTunnelAndForward(port) => {
                write!(f, "output:{}", port)
            }
            FlowAction::SetTunnelAndForward { vni, port } => {
                write!(f, "set_tunnel:{},output:{}", vni, port)
            }
        }
    }
}

/// One entry of a switch's forwarding table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowRule {
    pub switch: String,
    pub flow_match: FlowMatch,
    pub action: FlowAction,
}

impl FlowRule {
    pub fn new(switch: impl Into<String>, flow_match: FlowMatch, action: FlowAction) -> Self {
        Self {
            switch: switch.into(),
            flow_match,
            action,
        }
    }

    /// The flow text passed to `ovs-ofctl add-flow`.
    pub fn flow_spec(&self) -> String {
        format!("{},actions={}", self.flow_match, self.action)
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.switch, self.flow_spec())
    }
}

/// The two rules that make one `(physical port, VNI)` pairing reachable.
///
/// Both must be installed as a unit: without `inbound`, return traffic is
/// dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingPair {
    /// Encapsulate: physical port -> tunnel port, tagged.
    pub outbound: FlowRule,
    /// Decapsulate: tunnel port + tunnel id -> physical port.
    pub inbound: FlowRule,
}

impl BindingPair {
    pub fn vni(&self) -> Option<Vni> {
        self.inbound.flow_match.tun_id
    }

    /// Rules in install order: decapsulation first.
    pub fn rules(&self) -> [&FlowRule; 2] {
        [&self.inbound, &self.outbound]
    }
}

/// Bidirectional plain forwarding between two physical ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchPair {
    pub forward: FlowRule,
    pub reverse: FlowRule,
}

impl PatchPair {
    pub fn rules(&self) -> [&FlowRule; 2] {
        [&self.forward, &self.reverse]
    }
}
