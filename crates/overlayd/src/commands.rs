//! Shell command builders for switch and host operations

use std::net::IpAddr;

use overlay_common::shell::{
    shellquote, BRIDGE_CMD, IP_CMD, OVS_OFCTL_CMD, OVS_VSCTL_CMD, SYSCTL_CMD,
};
use overlay_common::{FlowRule, HostVtepSpec, StaticFdb, StaticNeighbor, TunnelPortSpec};
use overlay_types::{IpPrefix, VlanId};

use crate::config::Settings;

/// Binary paths and namespace policy used to render commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    ip: String,
    bridge: String,
    sysctl: String,
    ovs_vsctl: String,
    ovs_ofctl: String,
    host_netns: bool,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self {
            ip: IP_CMD.to_string(),
            bridge: BRIDGE_CMD.to_string(),
            sysctl: SYSCTL_CMD.to_string(),
            ovs_vsctl: OVS_VSCTL_CMD.to_string(),
            ovs_ofctl: OVS_OFCTL_CMD.to_string(),
            host_netns: true,
        }
    }
}

impl From<&Settings> for CommandBuilder {
    fn from(settings: &Settings) -> Self {
        Self {
            ip: settings.ip.clone(),
            bridge: settings.bridge.clone(),
            sysctl: settings.sysctl.clone(),
            ovs_vsctl: settings.ovs_vsctl.clone(),
            ovs_ofctl: settings.ovs_ofctl.clone(),
            host_netns: settings.host_netns,
        }
    }
}

impl CommandBuilder {
    /// `ip`, run inside `host`'s namespace when enabled.
    fn ip(&self, host: &str) -> String {
        if self.host_netns {
            format!("{} -n {}", self.ip, shellquote(host))
        } else {
            self.ip.clone()
        }
    }

    /// `bridge`, run inside `host`'s namespace when enabled.
    fn bridge(&self, host: &str) -> String {
        if self.host_netns {
            format!("{} -n {}", self.bridge, shellquote(host))
        } else {
            self.bridge.clone()
        }
    }

    /// `sysctl` has no namespace flag; enter it through `ip netns exec`.
    fn sysctl(&self, node: &str) -> String {
        if self.host_netns {
            format!("{} netns exec {} {}", self.ip, shellquote(node), self.sysctl)
        } else {
            self.sysctl.clone()
        }
    }

    /// Build VXLAN port creation command
    ///
    /// Pins the OpenFlow port number with `ofport_request` so planned
    /// rules refer to the right port.
    pub fn build_add_tunnel_port_cmd(&self, spec: &TunnelPortSpec) -> String {
        format!(
            "{} add-port {} {} -- set interface {} type=vxlan options:remote_ip={} options:key={} ofport_request={}",
            self.ovs_vsctl,
            shellquote(&spec.switch),
            shellquote(&spec.iface),
            shellquote(&spec.iface),
            shellquote(&spec.remote.to_string()),
            shellquote(&spec.mode.key()),
            spec.port
        )
    }

    /// Build VXLAN port deletion command
    pub fn build_del_tunnel_port_cmd(&self, switch: &str, iface: &str) -> String {
        format!(
            "{} --if-exists del-port {} {}",
            self.ovs_vsctl,
            shellquote(switch),
            shellquote(iface)
        )
    }

    pub fn build_add_flow_cmd(&self, rule: &FlowRule) -> String {
        format!(
            "{} add-flow {} {}",
            self.ovs_ofctl,
            shellquote(&rule.switch),
            shellquote(&rule.flow_spec())
        )
    }

    /// Build flow deletion command
    ///
    /// `--strict` removes only the rule with exactly this match.
    pub fn build_del_flow_cmd(&self, rule: &FlowRule) -> String {
        format!(
            "{} --strict del-flows {} {}",
            self.ovs_ofctl,
            shellquote(&rule.switch),
            shellquote(&rule.flow_match.to_string())
        )
    }

    pub fn build_dump_flows_cmd(&self, switch: &str) -> String {
        format!(
            "{} --no-stats --no-names dump-flows {}",
            self.ovs_ofctl,
            shellquote(switch)
        )
    }

    /// Build VLAN sub-interface creation command
    ///
    /// Flushes the parent's addresses, creates `<iface>.<vlan>` and brings it up.
    pub fn build_tag_vlan_cmd(&self, host: &str, iface: &str, vlan: VlanId) -> String {
        let ip = self.ip(host);
        let sub = vlan.sub_interface(iface);
        format!(
            "{ip} addr flush dev {parent} && {ip} link add link {parent} name {sub} type vlan id {vlan} && {ip} link set {sub} up",
            ip = ip,
            parent = shellquote(iface),
            sub = shellquote(&sub),
            vlan = vlan
        )
    }

    /// Build VLAN sub-interface deletion command (no-op when absent)
    pub fn build_untag_vlan_cmd(&self, host: &str, iface: &str, vlan: VlanId) -> String {
        let ip = self.ip(host);
        let sub = shellquote(&vlan.sub_interface(iface));
        format!(
            "if {ip} link show {sub} >/dev/null 2>&1; then {ip} link del {sub}; fi",
            ip = ip,
            sub = sub
        )
    }

    pub fn build_set_address_cmd(&self, host: &str, iface: &str, address: &IpPrefix) -> String {
        format!(
            "{} addr replace {} dev {}",
            self.ip(host),
            shellquote(&address.to_string()),
            shellquote(iface)
        )
    }

    /// Build default route command
    ///
    /// Uses 'replace' so a rerun does not fail on an existing route.
    pub fn build_default_route_cmd(&self, host: &str, gateway: IpAddr) -> String {
        let family = if gateway.is_ipv6() { " -6" } else { "" };
        format!(
            "{}{} route replace default via {}",
            self.ip(host),
            family,
            shellquote(&gateway.to_string())
        )
    }

    /// Build host VXLAN device creation command
    ///
    /// Learning is off; the device only reaches remotes given to it as
    /// static neighbor and FDB entries.
    pub fn build_add_host_vtep_cmd(&self, spec: &HostVtepSpec) -> String {
        let ip = self.ip(&spec.host);
        let vtep = shellquote(&spec.iface);
        format!(
            "{ip} link add {vtep} type vxlan id {vni} dev {link} l2miss l3miss rsc proxy nolearning && {ip} link set {vtep} address {mac} && {ip} addr replace {address} dev {vtep} && {ip} link set up {vtep}",
            ip = ip,
            vtep = vtep,
            vni = spec.vni,
            link = shellquote(&spec.link),
            mac = shellquote(&spec.mac.to_string()),
            address = shellquote(&spec.address.to_string())
        )
    }

    /// Build host VXLAN device deletion command (no-op when absent)
    pub fn build_del_host_vtep_cmd(&self, host: &str, iface: &str) -> String {
        let ip = self.ip(host);
        let vtep = shellquote(iface);
        format!(
            "if {ip} link show {vtep} >/dev/null 2>&1; then {ip} link del {vtep}; fi",
            ip = ip,
            vtep = vtep
        )
    }

    pub fn build_static_neighbor_cmd(&self, entry: &StaticNeighbor) -> String {
        format!(
            "{} neigh replace {} lladdr {} dev {} nud permanent",
            self.ip(&entry.host),
            shellquote(&entry.address.to_string()),
            shellquote(&entry.mac.to_string()),
            shellquote(&entry.iface)
        )
    }

    pub fn build_static_fdb_cmd(&self, entry: &StaticFdb) -> String {
        format!(
            "{} fdb replace {} dev {} self dst {} vni {}",
            self.bridge(&entry.host),
            shellquote(&entry.mac.to_string()),
            shellquote(&entry.iface),
            shellquote(&entry.dst.to_string()),
            entry.vni
        )
    }

    pub fn build_set_forwarding_cmd(&self, node: &str, enabled: bool) -> String {
        format!(
            "{} -w net.ipv4.ip_forward={}",
            self.sysctl(node),
            if enabled { 1 } else { 0 }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_common::{FlowAction, FlowMatch, TunnelMode};
    use overlay_types::{PortNo, Vni};

    fn port(p: u16) -> PortNo {
        PortNo::new(p).unwrap()
    }

    fn spec(mode: TunnelMode) -> TunnelPortSpec {
        TunnelPortSpec {
            switch: "s1".to_string(),
            iface: "s1-vtep1".to_string(),
            port: port(9),
            remote: "192.168.253.131".parse().unwrap(),
            mode,
        }
    }

    #[test]
    fn test_build_add_tunnel_port_cmd() {
        let cmds = CommandBuilder::default();
        let cmd = cmds.build_add_tunnel_port_cmd(&spec(TunnelMode::Fixed(Vni::new(100).unwrap())));
        assert!(cmd.starts_with("/usr/bin/ovs-vsctl add-port \"s1\" \"s1-vtep1\""));
        assert!(cmd.contains("type=vxlan"));
        assert!(cmd.contains("options:remote_ip=\"192.168.253.131\""));
        assert!(cmd.contains("options:key=\"100\""));
        assert!(cmd.ends_with("ofport_request=9"));

        let cmd = cmds.build_add_tunnel_port_cmd(&spec(TunnelMode::FlowBased));
        assert!(cmd.contains("options:key=\"flow\""));
    }

    #[test]
    fn test_build_flow_cmds() {
        let cmds = CommandBuilder::default();
        let rule = FlowRule::new(
            "s1",
            FlowMatch::tunnel(port(9), Vni::new(100).unwrap()),
            FlowAction::StripTunnelAndForward(port(1)),
        );
        assert_eq!(
            cmds.build_add_flow_cmd(&rule),
            "/usr/bin/ovs-ofctl add-flow \"s1\" \"in_port=9,tun_id=100,actions=output:1\""
        );
        assert_eq!(
            cmds.build_del_flow_cmd(&rule),
            "/usr/bin/ovs-ofctl --strict del-flows \"s1\" \"in_port=9,tun_id=100\""
        );
        assert!(cmds.build_dump_flows_cmd("s1").ends_with("dump-flows \"s1\""));
    }

    #[test]
    fn test_build_tag_vlan_cmd_in_netns() {
        let cmds = CommandBuilder::default();
        let cmd = cmds.build_tag_vlan_cmd("h1", "h1-eth0", VlanId::new(100).unwrap());
        assert!(cmd.starts_with("/sbin/ip -n \"h1\" addr flush dev \"h1-eth0\""));
        assert!(cmd.contains("link add link \"h1-eth0\" name \"h1-eth0.100\" type vlan id 100"));
        assert!(cmd.ends_with("link set \"h1-eth0.100\" up"));
    }

    #[test]
    fn test_build_untag_vlan_cmd_is_conditional() {
        let cmds = CommandBuilder::default();
        let cmd = cmds.build_untag_vlan_cmd("h1", "h1-eth0", VlanId::new(100).unwrap());
        assert!(cmd.starts_with("if /sbin/ip -n \"h1\" link show \"h1-eth0.100\""));
        assert!(cmd.contains("link del \"h1-eth0.100\""));
    }

    #[test]
    fn test_host_cmds_without_netns() {
        let settings = Settings {
            host_netns: false,
            ..Settings::default()
        };
        let cmds = CommandBuilder::from(&settings);
        let prefix: IpPrefix = "10.0.0.1/24".parse().unwrap();
        assert_eq!(
            cmds.build_set_address_cmd("h1", "h1-eth0.100", &prefix),
            "/sbin/ip addr replace \"10.0.0.1/24\" dev \"h1-eth0.100\""
        );
        assert_eq!(
            cmds.build_default_route_cmd("h1", "10.0.0.254".parse().unwrap()),
            "/sbin/ip route replace default via \"10.0.0.254\""
        );
        assert_eq!(
            cmds.build_default_route_cmd("h1", "fd00::1".parse().unwrap()),
            "/sbin/ip -6 route replace default via \"fd00::1\""
        );
        assert_eq!(
            cmds.build_set_forwarding_cmd("r0", true),
            "/sbin/sysctl -w net.ipv4.ip_forward=1"
        );
    }

    #[test]
    fn test_build_host_vtep_cmds() {
        let cmds = CommandBuilder::default();
        let spec = HostVtepSpec {
            host: "h1".to_string(),
            iface: "vtep1".to_string(),
            link: "h1-eth0".to_string(),
            vni: Vni::new(99).unwrap(),
            mac: "54:8:10:0:0:1".parse().unwrap(),
            address: "10.0.0.1/8".parse().unwrap(),
        };
        let cmd = cmds.build_add_host_vtep_cmd(&spec);
        assert!(cmd.starts_with(
            "/sbin/ip -n \"h1\" link add \"vtep1\" type vxlan id 99 dev \"h1-eth0\""
        ));
        assert!(cmd.contains("nolearning"));
        assert!(cmd.contains("link set \"vtep1\" address \"54:08:10:00:00:01\""));
        assert!(cmd.contains("addr replace \"10.0.0.1/8\" dev \"vtep1\""));
        assert!(cmd.ends_with("link set up \"vtep1\""));

        assert!(cmds
            .build_del_host_vtep_cmd("h1", "vtep1")
            .starts_with("if /sbin/ip -n \"h1\" link show \"vtep1\""));
    }

    #[test]
    fn test_build_static_entry_cmds() {
        let cmds = CommandBuilder::default();
        let neighbor = StaticNeighbor {
            host: "h1".to_string(),
            iface: "vtep1".to_string(),
            address: "10.0.0.2".parse().unwrap(),
            mac: "54:8:10:0:0:2".parse().unwrap(),
        };
        assert_eq!(
            cmds.build_static_neighbor_cmd(&neighbor),
            "/sbin/ip -n \"h1\" neigh replace \"10.0.0.2\" lladdr \"54:08:10:00:00:02\" dev \"vtep1\" nud permanent"
        );

        let fdb = StaticFdb {
            host: "h1".to_string(),
            iface: "vtep1".to_string(),
            mac: "54:8:10:0:0:2".parse().unwrap(),
            dst: "172.168.1.2".parse().unwrap(),
            vni: Vni::new(100).unwrap(),
        };
        assert_eq!(
            cmds.build_static_fdb_cmd(&fdb),
            "/sbin/bridge -n \"h1\" fdb replace \"54:08:10:00:00:02\" dev \"vtep1\" self dst \"172.168.1.2\" vni 100"
        );

        assert_eq!(
            cmds.build_set_forwarding_cmd("r0", false),
            "/sbin/ip netns exec \"r0\" /sbin/sysctl -w net.ipv4.ip_forward=0"
        );
    }
}
