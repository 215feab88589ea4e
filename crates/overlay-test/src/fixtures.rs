//! Test fixtures for common overlay layouts
//!
//! Topology documents are returned as JSON text, in the same format the
//! `overlayd` loader reads, so tests exercise the real parsing path.

use serde_json::json;

use overlay_common::{BindingPair, FlowAction, FlowMatch, FlowRule, PatchPair};
use overlay_types::{PortNo, Vni};

/// Remote VTEP used by the VLAN fixtures.
pub const REMOTE_VTEP: &str = "192.168.253.131";

/// Port number from a literal. Panics on an invalid number.
pub fn port(p: u16) -> PortNo {
    match PortNo::new(p) {
        Ok(port) => port,
        Err(e) => panic!("bad fixture port {}: {}", p, e),
    }
}

/// VNI from a literal. Panics on an invalid value.
pub fn vni(v: u32) -> Vni {
    match Vni::new(v) {
        Ok(vni) => vni,
        Err(e) => panic!("bad fixture vni {}: {}", v, e),
    }
}

/// Two VLAN hosts on `s1`, each bound to its own fixed-VNI tunnel.
///
/// h1 (VLAN 100) ↔ VNI 100 on port 9, h2 (VLAN 200) ↔ VNI 200 on port 10.
pub fn vlan_vxlan_json() -> String {
    json!({
        "name": "vlan-vxlan",
        "switches": ["s1"],
        "hosts": [
            { "name": "h1", "vlan": 100, "address": "10.0.0.1/24" },
            { "name": "h2", "vlan": 200, "address": "10.0.0.2/24" }
        ],
        "links": [["h1", "s1"], ["h2", "s1"]],
        "tunnels": [
            { "name": "vx100", "switch": "s1", "remote": REMOTE_VTEP, "vni": 100 },
            { "name": "vx200", "switch": "s1", "remote": REMOTE_VTEP, "vni": 200 }
        ],
        "bindings": [
            { "tunnel": "vx100", "port": "h1" },
            { "tunnel": "vx200", "port": "h2" }
        ]
    })
    .to_string()
}

/// Two VLAN hosts multiplexed over one flow-based tunnel.
///
/// Port 1 (h1) carries VNI 99 and port 2 (h2) VNI 100, both on port 9.
pub fn flow_vni_json() -> String {
    json!({
        "name": "flow-vni",
        "switches": ["s1"],
        "hosts": [
            { "name": "h1", "vlan": 99, "address": "10.0.0.1/24" },
            { "name": "h2", "vlan": 100, "address": "10.0.0.2/24" }
        ],
        "links": [["h1", "s1"], ["h2", "s1"]],
        "tunnels": [
            { "name": "vxflow", "switch": "s1", "remote": REMOTE_VTEP }
        ],
        "bindings": [
            { "tunnel": "vxflow", "vni": 99, "port": "h1" },
            { "tunnel": "vxflow", "vni": 100, "port": "h2" }
        ]
    })
    .to_string()
}

/// Two routed segments whose hosts terminate VXLAN themselves.
///
/// r0 routes 192.168.1.0/24 (s1) and 172.168.1.0/24 (s2). h1 runs vtep1
/// (VNI 99, 10.0.0.1) and h2 runs vtep2 (VNI 100, 10.0.0.2). Each switch
/// patches its router port (1) to its host port (2).
pub fn vxlan_host_vtep_json() -> String {
    json!({
        "name": "vxlan",
        "switches": ["s1", "s2"],
        "routers": [
            { "name": "r0", "addresses": ["192.168.1.1/24", "172.168.1.1/24"] }
        ],
        "hosts": [
            {
                "name": "h1",
                "address": "192.168.1.2/24",
                "default_route": "192.168.1.1",
                "vtep": { "vni": 99, "mac": "54:8:10:0:0:1", "address": "10.0.0.1/8" }
            },
            {
                "name": "h2",
                "address": "172.168.1.2/24",
                "default_route": "172.168.1.1",
                "vtep": { "vni": 100, "mac": "54:8:10:0:0:2", "address": "10.0.0.2/8" }
            }
        ],
        "links": [["s1", "r0"], ["s2", "r0"], ["h1", "s1"], ["h2", "s2"]],
        "patches": [
            { "switch": "s1", "ports": [1, 2] },
            { "switch": "s2", "ports": ["r0", "h2"] }
        ]
    })
    .to_string()
}

/// `in_port=physical -> set_tunnel:vni,output:tunnel`
pub fn encap_rule(switch: &str, physical: u16, vni_id: u32, tunnel: u16) -> FlowRule {
    FlowRule::new(
        switch,
        FlowMatch::port(port(physical)),
        FlowAction::SetTunnelAndForward {
            vni: vni(vni_id),
            port: port(tunnel),
        },
    )
}

/// `in_port=tunnel,tun_id=vni -> output:physical`
pub fn decap_rule(switch: &str, physical: u16, vni_id: u32, tunnel: u16) -> FlowRule {
    FlowRule::new(
        switch,
        FlowMatch::tunnel(port(tunnel), vni(vni_id)),
        FlowAction::StripTunnelAndForward(port(physical)),
    )
}

pub fn forward_rule(switch: &str, from: u16, to: u16) -> FlowRule {
    FlowRule::new(switch, FlowMatch::port(port(from)), FlowAction::Forward(port(to)))
}

pub fn binding_pair(switch: &str, physical: u16, vni_id: u32, tunnel: u16) -> BindingPair {
    BindingPair {
        outbound: encap_rule(switch, physical, vni_id, tunnel),
        inbound: decap_rule(switch, physical, vni_id, tunnel),
    }
}

pub fn patch_pair(switch: &str, a: u16, b: u16) -> PatchPair {
    PatchPair {
        forward: forward_rule(switch, a, b),
        reverse: forward_rule(switch, b, a),
    }
}
