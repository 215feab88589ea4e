//! Flow plan compiler.
//!
//! Turns declared `(physical port, VNI, tunnel port)` bindings into the
//! rule pairs that make them reachable. Nothing here touches a switch.

use std::collections::BTreeMap;

use tracing::debug;

use overlay_common::{
    BindingPair, FlowAction, FlowMatch, FlowRule, OverlayError, OverlayResult, PatchPair,
};
use overlay_types::{PortNo, Vni};

use crate::topology::Topology;
use crate::tunnel_registry::TunnelRegistry;

fn ensure_physical(topology: &Topology, switch: &str, port: PortNo) -> OverlayResult<()> {
    if topology.switch(switch)?.has_physical_port(port) {
        Ok(())
    } else {
        Err(OverlayError::NotPhysicalPort {
            switch: switch.to_string(),
            port,
        })
    }
}

/// Compiles one binding into its encapsulate/decapsulate pair.
///
/// Outbound: `in_port=P -> set_tunnel:V,output:T`.
/// Inbound: `in_port=T,tun_id=V -> output:P`.
pub fn plan_binding(
    registry: &TunnelRegistry,
    topology: &Topology,
    switch: &str,
    physical_port: PortNo,
    vni: Vni,
    tunnel_port: PortNo,
) -> OverlayResult<BindingPair> {
    ensure_physical(topology, switch, physical_port)?;
    registry.check_vni(switch, tunnel_port, vni)?;

    Ok(BindingPair {
        outbound: FlowRule::new(
            switch,
            FlowMatch::port(physical_port),
            FlowAction::SetTunnelAndForward {
                vni,
                port: tunnel_port,
            },
        ),
        inbound: FlowRule::new(
            switch,
            FlowMatch::tunnel(tunnel_port, vni),
            FlowAction::StripTunnelAndForward(physical_port),
        ),
    })
}

/// Compiles plain bidirectional forwarding between two physical ports.
pub fn plan_patch(
    topology: &Topology,
    switch: &str,
    a: PortNo,
    b: PortNo,
) -> OverlayResult<PatchPair> {
    ensure_physical(topology, switch, a)?;
    ensure_physical(topology, switch, b)?;
    if a == b {
        return Err(OverlayError::invalid_config(
            "patch",
            format!("port {} on {} cannot be patched to itself", a, switch),
        ));
    }

    Ok(PatchPair {
        forward: FlowRule::new(switch, FlowMatch::port(a), FlowAction::Forward(b)),
        reverse: FlowRule::new(switch, FlowMatch::port(b), FlowAction::Forward(a)),
    })
}

/// Pairs compiled for one topology, in insertion order.
#[derive(Debug, Default, Clone)]
pub struct FlowPlan {
    bindings: Vec<BindingPair>,
    patches: Vec<PatchPair>,
    by_match: BTreeMap<(String, FlowMatch), FlowRule>,
}

impl FlowPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `rules` against every planned match. Returns false when all
    /// of them are already planned verbatim.
    fn admit(&self, rules: [&FlowRule; 2]) -> OverlayResult<bool> {
        let mut fresh = false;
        for rule in rules {
            match self.by_match.get(&(rule.switch.clone(), rule.flow_match)) {
                Some(existing) if existing == rule => {}
                Some(existing) => {
                    return Err(OverlayError::MatchConflict {
                        existing: existing.clone(),
                        conflicting: rule.clone(),
                    })
                }
                None => fresh = true,
            }
        }
        Ok(fresh)
    }

    fn index(&mut self, rules: [&FlowRule; 2]) {
        for rule in rules {
            self.by_match
                .insert((rule.switch.clone(), rule.flow_match), rule.clone());
        }
    }

    /// Adds a binding pair. Adding the same pair twice is a no-op.
    pub fn add_binding(&mut self, pair: BindingPair) -> OverlayResult<()> {
        if !self.admit(pair.rules())? {
            debug!(rule = %pair.outbound, "Binding already planned");
            return Ok(());
        }
        self.index(pair.rules());
        self.bindings.push(pair);
        Ok(())
    }

    pub fn add_patch(&mut self, pair: PatchPair) -> OverlayResult<()> {
        if !self.admit(pair.rules())? {
            return Ok(());
        }
        self.index(pair.rules());
        self.patches.push(pair);
        Ok(())
    }

    pub fn bindings(&self) -> &[BindingPair] {
        &self.bindings
    }

    pub fn patches(&self) -> &[PatchPair] {
        &self.patches
    }

    /// Every rule in install order: each binding inbound first, then patches.
    pub fn rules(&self) -> impl Iterator<Item = &FlowRule> {
        self.bindings
            .iter()
            .flat_map(|p| p.rules())
            .chain(self.patches.iter().flat_map(|p| p.rules()))
    }

    /// Rules expected on one switch.
    pub fn rules_for<'a>(&'a self, switch: &'a str) -> impl Iterator<Item = &'a FlowRule> + 'a {
        self.rules().filter(move |r| r.switch == switch)
    }

    /// Drops every binding that goes through tunnel `port`, returning them.
    /// Bindings carried by tunnel `port` on `switch`.
    pub fn bindings_for_tunnel(&self, switch: &str, port: PortNo) -> Vec<BindingPair> {
        self.bindings
            .iter()
            .filter(|p| p.inbound.switch == switch && p.inbound.flow_match.in_port == port)
            .cloned()
            .collect()
    }

    /// Drops one binding and frees its matches. Returns false if it was not
    /// planned.
    pub fn remove_binding(&mut self, pair: &BindingPair) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|p| p != pair);
        if self.bindings.len() == before {
            return false;
        }
        for rule in pair.rules() {
            self.by_match.remove(&(rule.switch.clone(), rule.flow_match));
        }
        true
    }

    pub fn len(&self) -> usize {
        self.bindings.len() + self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::IpAddr;

    fn port(p: u16) -> PortNo {
        PortNo::new(p).unwrap()
    }

    fn vni(v: u32) -> Vni {
        Vni::new(v).unwrap()
    }

    fn remote() -> IpAddr {
        "192.168.253.131".parse().unwrap()
    }

    fn setup() -> (Topology, TunnelRegistry) {
        let mut topo = Topology::open("test");
        let s1 = topo.add_switch("s1").unwrap();
        for name in ["h1", "h2", "h3"] {
            let h = topo.add_host(name, None, None).unwrap();
            topo.add_link(h, s1).unwrap();
        }
        (topo, TunnelRegistry::new())
    }

    #[test]
    fn test_plan_binding_two_rules() {
        let (mut topo, mut registry) = setup();
        let t = registry
            .define_tunnel(&mut topo, "s1", remote(), Some(vni(100)))
            .unwrap();

        let pair = plan_binding(&registry, &topo, "s1", port(1), vni(100), t.port).unwrap();
        assert_eq!(pair.outbound.flow_spec(), "in_port=1,actions=set_tunnel:100,output:9");
        assert_eq!(pair.inbound.flow_spec(), "in_port=9,tun_id=100,actions=output:1");
    }

    #[test]
    fn test_plan_binding_fixed_vni_mismatch() {
        let (mut topo, mut registry) = setup();
        let t = registry
            .define_tunnel(&mut topo, "s1", remote(), Some(vni(100)))
            .unwrap();
        assert!(matches!(
            plan_binding(&registry, &topo, "s1", port(1), vni(200), t.port),
            Err(OverlayError::VniMismatch { .. })
        ));
    }

    #[test]
    fn test_plan_binding_flow_based_any_vni() {
        let (mut topo, mut registry) = setup();
        let t = registry.define_tunnel(&mut topo, "s1", remote(), None).unwrap();
        assert!(plan_binding(&registry, &topo, "s1", port(1), vni(100), t.port).is_ok());
        assert!(plan_binding(&registry, &topo, "s1", port(2), vni(200), t.port).is_ok());
    }

    #[test]
    fn test_plan_binding_requires_physical_port() {
        let (mut topo, mut registry) = setup();
        let t = registry.define_tunnel(&mut topo, "s1", remote(), None).unwrap();
        assert!(matches!(
            plan_binding(&registry, &topo, "s1", t.port, vni(100), t.port),
            Err(OverlayError::NotPhysicalPort { .. })
        ));
        assert!(matches!(
            plan_binding(&registry, &topo, "s1", port(1), vni(100), port(3)),
            Err(OverlayError::UnknownTunnelPort { .. })
        ));
    }

    #[test]
    fn test_flow_plan_dedup_and_conflict() {
        let (mut topo, mut registry) = setup();
        let t = registry.define_tunnel(&mut topo, "s1", remote(), None).unwrap();
        let mut plan = FlowPlan::new();

        let pair = plan_binding(&registry, &topo, "s1", port(1), vni(100), t.port).unwrap();
        plan.add_binding(pair.clone()).unwrap();
        plan.add_binding(pair).unwrap();
        assert_eq!(plan.len(), 1);

        // Same physical port, second VNI
        let other = plan_binding(&registry, &topo, "s1", port(1), vni(200), t.port).unwrap();
        assert!(matches!(
            plan.add_binding(other),
            Err(OverlayError::MatchConflict { .. })
        ));
        assert_eq!(plan.rules().count(), 2);
    }

    #[test]
    fn test_flow_plan_install_order() {
        let (mut topo, mut registry) = setup();
        let t = registry.define_tunnel(&mut topo, "s1", remote(), None).unwrap();
        let mut plan = FlowPlan::new();
        plan.add_binding(plan_binding(&registry, &topo, "s1", port(1), vni(100), t.port).unwrap())
            .unwrap();
        plan.add_binding(plan_binding(&registry, &topo, "s1", port(2), vni(200), t.port).unwrap())
            .unwrap();

        let specs: Vec<_> = plan.rules().map(|r| r.flow_spec()).collect();
        assert_eq!(
            specs,
            vec![
                "in_port=9,tun_id=100,actions=output:1",
                "in_port=1,actions=set_tunnel:100,output:9",
                "in_port=9,tun_id=200,actions=output:2",
                "in_port=2,actions=set_tunnel:200,output:9",
            ]
        );
    }

    #[test]
    fn test_plan_patch() {
        let (topo, _) = setup();
        let patch = plan_patch(&topo, "s1", port(1), port(2)).unwrap();
        assert_eq!(patch.forward.flow_spec(), "in_port=1,actions=output:2");
        assert_eq!(patch.reverse.flow_spec(), "in_port=2,actions=output:1");

        assert!(plan_patch(&topo, "s1", port(1), port(1)).is_err());
        assert!(matches!(
            plan_patch(&topo, "s1", port(1), port(7)),
            Err(OverlayError::NotPhysicalPort { .. })
        ));
    }

    #[test]
    fn test_patch_conflicts_with_binding() {
        let (mut topo, mut registry) = setup();
        let t = registry.define_tunnel(&mut topo, "s1", remote(), None).unwrap();
        let mut plan = FlowPlan::new();
        plan.add_binding(plan_binding(&registry, &topo, "s1", port(1), vni(100), t.port).unwrap())
            .unwrap();
        let patch = plan_patch(&topo, "s1", port(1), port(2)).unwrap();
        assert!(matches!(
            plan.add_patch(patch),
            Err(OverlayError::MatchConflict { .. })
        ));
    }

    #[test]
    fn test_remove_binding_for_tunnel() {
        let (mut topo, mut registry) = setup();
        let flow = registry.define_tunnel(&mut topo, "s1", remote(), None).unwrap();
        let fixed = registry
            .define_tunnel(&mut topo, "s1", remote(), Some(vni(300)))
            .unwrap();
        let mut plan = FlowPlan::new();
        plan.add_binding(plan_binding(&registry, &topo, "s1", port(1), vni(100), flow.port).unwrap())
            .unwrap();
        plan.add_binding(plan_binding(&registry, &topo, "s1", port(3), vni(300), fixed.port).unwrap())
            .unwrap();

        let carried = plan.bindings_for_tunnel("s1", flow.port);
        assert_eq!(carried.len(), 1);
        assert!(plan.remove_binding(&carried[0]));
        assert!(!plan.remove_binding(&carried[0]));
        assert_eq!(plan.bindings().len(), 1);

        // The freed physical port can be bound again
        plan.add_binding(plan_binding(&registry, &topo, "s1", port(1), vni(200), flow.port).unwrap())
            .unwrap();
        assert_eq!(plan.bindings().len(), 2);
    }
}
