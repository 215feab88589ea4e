//! Compiles a topology document into the full declared state.
//!
//! Nothing here calls a control surface: a blueprint is the topology, its
//! host VTEPs, its tunnels and the flow plan, ready to be applied or compared.

use std::collections::BTreeMap;

use tracing::debug;

use overlay_common::{EntityKind, OverlayError, OverlayResult};
use overlay_types::PortNo;

use crate::config::{OverlayConfig, PortRef};
use crate::flow_plan::{plan_binding, plan_patch, FlowPlan};
use crate::host_vtep::{plan_host_vtep, HostVtepPlan};
use crate::topology::{NodeRef, Topology};
use crate::tunnel_registry::{TunnelEndpoint, TunnelRegistry};

/// Declared state of one network.
#[derive(Debug)]
pub struct Blueprint {
    pub topology: Topology,
    pub registry: TunnelRegistry,
    pub plan: FlowPlan,
    /// Host VTEPs in declaration order.
    pub host_vteps: Vec<HostVtepPlan>,
    /// Configured tunnel name -> `(switch, port)`.
    pub tunnels: BTreeMap<String, (String, PortNo)>,
}

impl Blueprint {
    pub fn build(config: &OverlayConfig) -> OverlayResult<Self> {
        let mut topology = Topology::open(config.name.clone());

        for switch in &config.switches {
            topology.add_switch(switch.clone())?;
        }
        for host in &config.hosts {
            let h = topology.add_host(host.name.clone(), host.vlan, host.address)?;
            if let Some(gateway) = host.default_route {
                topology.set_default_route(h, gateway)?;
            }
        }
        for router in &config.routers {
            topology.add_router(router.name.clone(), router.addresses.clone(), router.forwarding)?;
        }
        for [a, b] in &config.links {
            let a = node(&topology, a)?;
            let b = node(&topology, b)?;
            topology.add_link(a, b)?;
        }
        for router in topology.routers() {
            let ifaces = router.interfaces().count();
            if router.addresses().len() > ifaces {
                return Err(OverlayError::invalid_config(
                    "routers",
                    format!(
                        "router '{}' has {} addresses but {} links",
                        router.name,
                        router.addresses().len(),
                        ifaces
                    ),
                ));
            }
        }

        for host in &config.hosts {
            if let Some(vtep) = &host.vtep {
                let h = topology.host_ref(&host.name)?;
                topology.add_host_vtep(h, vtep.vni, vtep.mac, vtep.address)?;
            }
        }
        let host_vteps = config
            .hosts
            .iter()
            .filter_map(|host| host.vtep.as_ref().map(|vtep| (host, vtep)))
            .map(|(host, vtep)| plan_host_vtep(&topology, &host.name, vtep.peers.as_deref()))
            .collect::<OverlayResult<Vec<_>>>()?;

        let mut registry = TunnelRegistry::with_floor(config.settings.tunnel_port_floor);
        let mut tunnels = BTreeMap::new();
        for tunnel in &config.tunnels {
            let def = registry.define_tunnel(&mut topology, &tunnel.switch, tunnel.remote, tunnel.vni)?;
            if !def.created {
                debug!(tunnel = %tunnel.name, port = %def.port, "Tunnel shares an existing port");
            }
            tunnels.insert(tunnel.name.clone(), (tunnel.switch.clone(), def.port));
        }

        let mut plan = FlowPlan::new();
        for binding in &config.bindings {
            let (switch, tunnel_port) = tunnels
                .get(&binding.tunnel)
                .ok_or_else(|| OverlayError::unknown(EntityKind::Tunnel, binding.tunnel.clone()))?;
            let endpoint = registry.endpoint(switch, *tunnel_port)?;
            let vni = binding
                .vni
                .or_else(|| endpoint.mode.fixed_vni())
                .ok_or_else(|| {
                    OverlayError::invalid_config(
                        "bindings",
                        format!("tunnel '{}' is flow-based; the binding needs a vni", binding.tunnel),
                    )
                })?;
            let physical = resolve_port(&topology, switch, &binding.port)?;
            let pair = plan_binding(&registry, &topology, switch, physical, vni, *tunnel_port)?;
            plan.add_binding(pair)?;
        }
        for patch in &config.patches {
            let [a, b] = &patch.ports;
            let a = resolve_port(&topology, &patch.switch, a)?;
            let b = resolve_port(&topology, &patch.switch, b)?;
            plan.add_patch(plan_patch(&topology, &patch.switch, a, b)?)?;
        }

        debug!(
            topology = %topology.name(),
            tunnels = tunnels.len(),
            host_vteps = host_vteps.len(),
            pairs = plan.len(),
            "Blueprint built"
        );
        Ok(Self {
            topology,
            registry,
            plan,
            host_vteps,
            tunnels,
        })
    }

    /// Distinct tunnel endpoints, ordered by switch then port.
    pub fn endpoints(&self) -> Vec<&TunnelEndpoint> {
        self.registry.all()
    }
}

fn node(topology: &Topology, name: &str) -> OverlayResult<NodeRef> {
    topology
        .node(name)
        .ok_or_else(|| OverlayError::unknown(EntityKind::Host, name))
}

fn resolve_port(topology: &Topology, switch: &str, port: &PortRef) -> OverlayResult<PortNo> {
    match port {
        PortRef::Number(port) => Ok(*port),
        PortRef::Node(name) => topology.port_towards(switch, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_types::Vni;
    use pretty_assertions::assert_eq;

    fn port(p: u16) -> PortNo {
        PortNo::new(p).unwrap()
    }

    #[test]
    fn test_build_vlan_vxlan() {
        let config = OverlayConfig::from_json(&overlay_test::fixtures::vlan_vxlan_json()).unwrap();
        let blueprint = Blueprint::build(&config).unwrap();

        assert_eq!(blueprint.tunnels["vx100"], ("s1".to_string(), port(9)));
        assert_eq!(blueprint.tunnels["vx200"], ("s1".to_string(), port(10)));
        assert_eq!(blueprint.plan.rules().count(), 4);
        assert_eq!(blueprint.endpoints().len(), 2);
    }

    #[test]
    fn test_flow_based_binding_needs_vni() {
        let config = OverlayConfig::from_json(
            r#"{
                "switches": ["s1"],
                "hosts": [{ "name": "h1" }],
                "links": [["h1", "s1"]],
                "tunnels": [{ "name": "vx", "switch": "s1", "remote": "10.0.0.9" }],
                "bindings": [{ "tunnel": "vx", "port": "h1" }]
            }"#,
        )
        .unwrap();
        let err = Blueprint::build(&config).unwrap_err();
        assert!(matches!(err, OverlayError::InvalidConfig { .. }));
    }

    #[test]
    fn test_unknown_tunnel_in_binding() {
        let config = OverlayConfig::from_json(
            r#"{
                "switches": ["s1"],
                "hosts": [{ "name": "h1" }],
                "links": [["h1", "s1"]],
                "bindings": [{ "tunnel": "missing", "vni": 5, "port": "h1" }]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            Blueprint::build(&config),
            Err(OverlayError::UnknownEntity {
                kind: EntityKind::Tunnel,
                ..
            })
        ));
    }

    #[test]
    fn test_same_tunnel_declared_twice_shares_port() {
        let config = OverlayConfig::from_json(
            r#"{
                "switches": ["s1"],
                "hosts": [{ "name": "h1" }],
                "links": [["h1", "s1"]],
                "tunnels": [
                    { "name": "a", "switch": "s1", "remote": "10.0.0.9", "vni": 7 },
                    { "name": "b", "switch": "s1", "remote": "10.0.0.9", "vni": 7 }
                ],
                "bindings": [{ "tunnel": "a", "port": "h1" }, { "tunnel": "b", "port": "h1" }]
            }"#,
        )
        .unwrap();
        let blueprint = Blueprint::build(&config).unwrap();
        assert_eq!(blueprint.tunnels["a"], blueprint.tunnels["b"]);
        assert_eq!(blueprint.endpoints().len(), 1);
        assert_eq!(blueprint.plan.bindings()[0].vni(), Some(Vni::new(7).unwrap()));
        assert_eq!(blueprint.plan.len(), 1);
    }

    #[test]
    fn test_build_host_vtep_layout() {
        let config =
            OverlayConfig::from_json(&overlay_test::fixtures::vxlan_host_vtep_json()).unwrap();
        let blueprint = Blueprint::build(&config).unwrap();

        assert_eq!(blueprint.host_vteps.len(), 2);
        let h2 = &blueprint.host_vteps[1];
        assert_eq!(h2.spec.iface, "vtep2");
        assert_eq!(h2.spec.link, "h2-eth0");
        assert_eq!(h2.fdb[0].dst.to_string(), "192.168.1.2");
        assert_eq!(h2.fdb[0].vni, Vni::new(99).unwrap());

        let router = blueprint.topology.routers().next().unwrap();
        let ifaces: Vec<_> = router.interfaces().map(|(iface, _)| iface).collect();
        assert_eq!(ifaces, vec!["r0-eth0", "r0-eth1"]);
        // s1: port 1 faces r0, port 2 faces h1
        assert_eq!(blueprint.topology.port_towards("s1", "r0").unwrap(), port(1));
        assert_eq!(blueprint.plan.rules().count(), 4);
        assert!(blueprint.endpoints().is_empty());
    }

    #[test]
    fn test_router_with_more_addresses_than_links() {
        let config = OverlayConfig::from_json(
            r#"{
                "switches": ["s1"],
                "routers": [{ "name": "r0", "addresses": ["10.0.0.1/24", "10.0.1.1/24"] }],
                "links": [["s1", "r0"]]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            Blueprint::build(&config),
            Err(OverlayError::InvalidConfig { .. })
        ));
    }
}
