//! Topology document loading.
//!
//! File format:
//! ```json
//! {
//!   "name": "vlan-vxlan",
//!   "settings": { "tunnel_port_floor": 9, "apply_timeout_ms": 5000 },
//!   "switches": ["s1"],
//!   "hosts": [
//!     { "name": "h1", "vlan": 100, "address": "10.0.0.1/24" },
//!     { "name": "h2", "address": "192.168.1.2/24",
//!       "vtep": { "vni": 99, "mac": "54:08:10:00:00:01", "address": "10.0.1.1/8" } }
//!   ],
//!   "routers": [{ "name": "r0", "addresses": ["192.168.1.1/24"] }],
//!   "links": [["h1", "s1"], ["h2", "s1"], ["s1", "r0"]],
//!   "tunnels": [
//!     { "name": "vx100", "switch": "s1", "remote": "192.168.253.131", "vni": 100 }
//!   ],
//!   "bindings": [
//!     { "tunnel": "vx100", "port": "h1" }
//!   ],
//!   "patches": []
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

use overlay_common::shell::{BRIDGE_CMD, IP_CMD, OVS_OFCTL_CMD, OVS_VSCTL_CMD, SYSCTL_CMD};
use overlay_common::{OverlayError, OverlayResult};
use overlay_types::{IpPrefix, MacAddress, PortNo, VlanId, Vni};

use crate::tunnel_registry::DEFAULT_TUNNEL_PORT_FLOOR;

/// Default boundary timeout in milliseconds.
pub const DEFAULT_APPLY_TIMEOUT_MS: u64 = 5000;

fn default_tunnel_port_floor() -> u16 {
    DEFAULT_TUNNEL_PORT_FLOOR
}

fn default_apply_timeout_ms() -> u64 {
    DEFAULT_APPLY_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_ip() -> String {
    IP_CMD.to_string()
}

fn default_bridge() -> String {
    BRIDGE_CMD.to_string()
}

fn default_sysctl() -> String {
    SYSCTL_CMD.to_string()
}

fn default_ovs_vsctl() -> String {
    OVS_VSCTL_CMD.to_string()
}

fn default_ovs_ofctl() -> String {
    OVS_OFCTL_CMD.to_string()
}

fn default_name() -> String {
    "overlay".to_string()
}

/// Runtime knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_tunnel_port_floor")]
    pub tunnel_port_floor: u16,
    /// Upper bound on one boundary call.
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,
    /// Run host commands inside the host's network namespace, as
    /// `ip -n <host>`.
    ///
    /// `ip -n` only finds named namespaces, i.e. a bind mount at
    /// `/var/run/netns/<host>`. Emulators that start hosts in anonymous
    /// namespaces need that link created (`ip netns attach <host> <pid>`)
    /// or this set to false with the commands run from inside each host.
    #[serde(default = "default_true")]
    pub host_netns: bool,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_bridge")]
    pub bridge: String,
    #[serde(default = "default_sysctl")]
    pub sysctl: String,
    #[serde(default = "default_ovs_vsctl")]
    pub ovs_vsctl: String,
    #[serde(default = "default_ovs_ofctl")]
    pub ovs_ofctl: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tunnel_port_floor: default_tunnel_port_floor(),
            apply_timeout_ms: default_apply_timeout_ms(),
            host_netns: true,
            ip: default_ip(),
            bridge: default_bridge(),
            sysctl: default_sysctl(),
            ovs_vsctl: default_ovs_vsctl(),
            ovs_ofctl: default_ovs_ofctl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub name: String,
    #[serde(default)]
    pub vlan: Option<VlanId>,
    #[serde(default)]
    pub address: Option<IpPrefix>,
    #[serde(default)]
    pub default_route: Option<IpAddr>,
    #[serde(default)]
    pub vtep: Option<HostVtepConfig>,
}

/// A kernel VXLAN device on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostVtepConfig {
    pub vni: Vni,
    pub mac: MacAddress,
    pub address: IpPrefix,
    /// Hosts this device reaches. Every other VTEP host when omitted.
    #[serde(default)]
    pub peers: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    pub name: String,
    /// One per interface, in link order.
    #[serde(default)]
    pub addresses: Vec<IpPrefix>,
    #[serde(default = "default_true")]
    pub forwarding: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    pub name: String,
    pub switch: String,
    pub remote: IpAddr,
    /// Fixed VNI. Omitted for a flow-based tunnel.
    #[serde(default)]
    pub vni: Option<Vni>,
}

/// A switch port, by number or by the host or router linked to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(PortNo),
    Node(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub tunnel: String,
    /// Required on flow-based tunnels; defaults to the bound VNI otherwise.
    #[serde(default)]
    pub vni: Option<Vni>,
    pub port: PortRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    pub switch: String,
    pub ports: [PortRef; 2],
}

/// A whole managed network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub switches: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub routers: Vec<RouterConfig>,
    #[serde(default)]
    pub links: Vec<[String; 2]>,
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
    #[serde(default)]
    pub patches: Vec<PatchConfig>,
}

impl OverlayConfig {
    /// Loads and validates a topology document.
    pub fn from_file(path: impl AsRef<Path>) -> OverlayResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            OverlayError::invalid_config(
                "config",
                format!("Failed to open {}: {}", path.display(), e),
            )
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            OverlayError::invalid_config(
                "config",
                format!("Failed to parse JSON from {}: {}", path.display(), e),
            )
        })?;
        config.validate()?;
        info!(
            path = %path.display(),
            hosts = config.hosts.len(),
            routers = config.routers.len(),
            tunnels = config.tunnels.len(),
            "Loaded topology"
        );
        Ok(config)
    }

    pub fn from_json(json: &str) -> OverlayResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OverlayError::invalid_config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings and tunnel-name uniqueness. Everything else is
    /// checked while the topology is built.
    pub fn validate(&self) -> OverlayResult<()> {
        if self.settings.apply_timeout_ms == 0 {
            return Err(OverlayError::invalid_config(
                "settings.apply_timeout_ms",
                "must be positive",
            ));
        }
        PortNo::new(self.settings.tunnel_port_floor).map_err(|_| {
            OverlayError::invalid_config(
                "settings.tunnel_port_floor",
                format!("{} is not a valid port", self.settings.tunnel_port_floor),
            )
        })?;

        let mut names: Vec<_> = self.tunnels.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(OverlayError::invalid_config(
                "tunnels",
                format!("tunnel '{}' declared twice", dup[0]),
            ));
        }
        Ok(())
    }

    pub fn tunnel(&self, name: &str) -> Option<&TunnelConfig> {
        self.tunnels.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VLAN_VXLAN: &str = r#"{
        "name": "vlan-vxlan",
        "switches": ["s1"],
        "hosts": [
            { "name": "h1", "vlan": 100, "address": "10.0.0.1/24" },
            { "name": "h2", "vlan": 200, "address": "10.0.0.2/24", "default_route": "10.0.0.254" }
        ],
        "links": [["h1", "s1"], ["h2", "s1"]],
        "tunnels": [
            { "name": "vx100", "switch": "s1", "remote": "192.168.253.131", "vni": 100 },
            { "name": "vx200", "switch": "s1", "remote": "192.168.253.131", "vni": 200 }
        ],
        "bindings": [
            { "tunnel": "vx100", "port": "h1" },
            { "tunnel": "vx200", "port": 2 }
        ]
    }"#;

    #[test]
    fn test_parse_document() {
        let config = OverlayConfig::from_json(VLAN_VXLAN).unwrap();
        assert_eq!(config.name, "vlan-vxlan");
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.hosts[0].vlan, Some(VlanId::new(100).unwrap()));
        assert_eq!(
            config.hosts[1].default_route,
            Some("10.0.0.254".parse().unwrap())
        );
        assert_eq!(config.bindings[0].port, PortRef::Node("h1".to_string()));
        assert_eq!(
            config.bindings[1].port,
            PortRef::Number(PortNo::new(2).unwrap())
        );
        assert_eq!(config.tunnel("vx200").unwrap().vni, Some(Vni::new(200).unwrap()));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(VLAN_VXLAN.as_bytes()).unwrap();

        let config = OverlayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tunnels.len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = OverlayConfig::from_file("/nonexistent/overlay.json").unwrap_err();
        assert!(matches!(err, OverlayError::InvalidConfig { .. }));
    }

    #[test]
    fn test_settings_override() {
        let config = OverlayConfig::from_json(
            r#"{ "settings": { "tunnel_port_floor": 20, "host_netns": false } }"#,
        )
        .unwrap();
        assert_eq!(config.settings.tunnel_port_floor, 20);
        assert!(!config.settings.host_netns);
        assert_eq!(config.settings.apply_timeout_ms, DEFAULT_APPLY_TIMEOUT_MS);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(OverlayConfig::from_json(r#"{ "hosts": [{ "name": "h1", "vlan": 4095 }] }"#).is_err());
        assert!(OverlayConfig::from_json(
            r#"{ "tunnels": [{ "name": "t", "switch": "s1", "remote": "1.1.1.1", "vni": 16777216 }] }"#
        )
        .is_err());
        assert!(OverlayConfig::from_json(r#"{ "settings": { "apply_timeout_ms": 0 } }"#).is_err());
        assert!(OverlayConfig::from_json(r#"{ "unknown": 1 }"#).is_err());
    }

    #[test]
    fn test_parse_routers_and_host_vteps() {
        let config = OverlayConfig::from_json(
            r#"{
                "routers": [{ "name": "r0", "addresses": ["192.168.1.1/24"] }],
                "hosts": [{
                    "name": "h1",
                    "address": "192.168.1.2/24",
                    "vtep": { "vni": 99, "mac": "54:8:10:0:0:1", "address": "10.0.0.1/8", "peers": ["h2"] }
                }]
            }"#,
        )
        .unwrap();
        assert!(config.routers[0].forwarding);
        let vtep = config.hosts[0].vtep.as_ref().unwrap();
        assert_eq!(vtep.mac.to_string(), "54:08:10:00:00:01");
        assert_eq!(vtep.peers.as_deref(), Some(&["h2".to_string()][..]));

        assert!(OverlayConfig::from_json(
            r#"{ "hosts": [{ "name": "h1", "vtep": { "vni": 99, "mac": "zz", "address": "10.0.0.1/8" } }] }"#
        )
        .is_err());
    }

    #[test]
    fn test_rejects_duplicate_tunnel_names() {
        let err = OverlayConfig::from_json(
            r#"{ "tunnels": [
                { "name": "t", "switch": "s1", "remote": "1.1.1.1" },
                { "name": "t", "switch": "s2", "remote": "1.1.1.1" }
            ] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }
}
