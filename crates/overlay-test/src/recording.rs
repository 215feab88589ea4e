//! In-memory control surface.
//!
//! Models just enough switch and host state to check what the planner
//! asked for: flow tables keyed by match (a second install with the same
//! match replaces the first, as `add-flow` does), tunnel ports, VLAN
//! sub-interfaces, addresses, default routes, host VTEPs with their static
//! neighbor and FDB entries, and router forwarding.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use overlay_common::{
    Ack, ApplyError, BoundaryOp, ControlSurface, FlowMatch, FlowRule, HostVtepSpec, StaticFdb,
    StaticNeighbor, TunnelPortSpec,
};
use overlay_types::{IpPrefix, MacAddress, VlanId};

/// Reason attached to injected failures.
pub const INJECTED_FAILURE: &str = "injected failure";

/// One boundary call as the surface saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: BoundaryOp,
    pub detail: String,
}

#[derive(Debug, Default)]
struct State {
    flows: BTreeMap<String, BTreeMap<FlowMatch, FlowRule>>,
    ports: BTreeMap<String, BTreeMap<String, TunnelPortSpec>>,
    vlan_tags: BTreeSet<(String, String)>,
    addresses: BTreeMap<(String, String), IpPrefix>,
    routes: BTreeMap<String, IpAddr>,
    host_vteps: BTreeMap<(String, String), HostVtepSpec>,
    neighbors: BTreeMap<(String, String, IpAddr), StaticNeighbor>,
    fdb: BTreeMap<(String, String, MacAddress), StaticFdb>,
    forwarding: BTreeMap<String, bool>,
    calls: Vec<Call>,
    failures: Vec<(BoundaryOp, String)>,
}

impl State {
    /// Logs the call, then fails it if an injected failure matches.
    fn enter(&mut self, operation: BoundaryOp, detail: String) -> Result<(), String> {
        debug!(operation = %operation, detail = %detail, "Recorded call");
        let failed = self
            .failures
            .iter()
            .any(|(op, needle)| *op == operation && detail.contains(needle.as_str()));
        self.calls.push(Call { operation, detail });
        if failed {
            Err(INJECTED_FAILURE.to_string())
        } else {
            Ok(())
        }
    }

    fn has_host_vtep(&self, host: &str, iface: &str) -> bool {
        self.host_vteps
            .contains_key(&(host.to_string(), iface.to_string()))
    }
}

/// Control surface that applies calls to in-memory state.
///
/// Clones share state, so a test can hand one clone to the planner and
/// inspect the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    state: Arc<Mutex<State>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every `operation` call whose detail contains `needle` fail.
    /// An empty needle fails them all.
    pub fn fail_on(&self, operation: BoundaryOp, needle: impl Into<String>) {
        self.state().failures.push((operation, needle.into()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Rules on `switch`, ordered by match.
    pub fn flows(&self, switch: &str) -> Vec<FlowRule> {
        self.state()
            .flows
            .get(switch)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn flow_count(&self) -> usize {
        self.state().flows.values().map(BTreeMap::len).sum()
    }

    pub fn tunnel_ports(&self, switch: &str) -> Vec<TunnelPortSpec> {
        self.state()
            .ports
            .get(switch)
            .map(|ports| ports.values().cloned().collect())
            .unwrap_or_default()
    }

    /// `(host, sub-interface)` pairs currently present.
    pub fn vlan_tags(&self) -> Vec<(String, String)> {
        self.state().vlan_tags.iter().cloned().collect()
    }

    pub fn address(&self, host: &str, iface: &str) -> Option<IpPrefix> {
        self.state()
            .addresses
            .get(&(host.to_string(), iface.to_string()))
            .copied()
    }

    pub fn default_route(&self, host: &str) -> Option<IpAddr> {
        self.state().routes.get(host).copied()
    }

    /// VXLAN devices on `host`, ordered by name.
    pub fn host_vteps(&self, host: &str) -> Vec<HostVtepSpec> {
        self.state()
            .host_vteps
            .values()
            .filter(|v| v.host == host)
            .cloned()
            .collect()
    }

    pub fn neighbors(&self, host: &str) -> Vec<StaticNeighbor> {
        self.state()
            .neighbors
            .values()
            .filter(|n| n.host == host)
            .cloned()
            .collect()
    }

    pub fn fdb_entries(&self, host: &str) -> Vec<StaticFdb> {
        self.state()
            .fdb
            .values()
            .filter(|e| e.host == host)
            .cloned()
            .collect()
    }

    /// Forwarding state of `node`, `None` if never set.
    pub fn forwarding(&self, node: &str) -> Option<bool> {
        self.state().forwarding.get(node).copied()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn calls_of(&self, operation: BoundaryOp) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, operation: BoundaryOp) -> usize {
        self.calls_of(operation).len()
    }
}

#[async_trait]
impl ControlSurface for RecordingSurface {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create_tunnel_port(&mut self, spec: &TunnelPortSpec) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        let detail = format!(
            "{}:{} port={} remote={} key={}",
            spec.switch,
            spec.iface,
            spec.port,
            spec.remote,
            spec.mode.key()
        );
        let fail = |reason: String| ApplyError::PortCreateFailed {
            switch: spec.switch.clone(),
            iface: spec.iface.clone(),
            reason,
        };
        state.enter(BoundaryOp::CreateSwitchPort, detail).map_err(fail)?;

        let ports = state.ports.entry(spec.switch.clone()).or_default();
        if ports.contains_key(&spec.iface) {
            return Err(fail(format!("{} already exists", spec.iface)));
        }
        if ports.values().any(|p| p.port == spec.port) {
            return Err(fail(format!("port {} already in use", spec.port)));
        }
        ports.insert(spec.iface.clone(), spec.clone());
        Ok(Ack::new(BoundaryOp::CreateSwitchPort, spec.iface.clone()))
    }

    async fn remove_tunnel_port(&mut self, switch: &str, iface: &str) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        state
            .enter(BoundaryOp::RemoveSwitchPort, format!("{}:{}", switch, iface))
            .map_err(|reason| ApplyError::TeardownFailed {
                entity: format!("{}:{}", switch, iface),
                reason,
            })?;
        if let Some(ports) = state.ports.get_mut(switch) {
            ports.remove(iface);
        }
        Ok(Ack::new(BoundaryOp::RemoveSwitchPort, iface))
    }

    async fn install_flow(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        state
            .enter(BoundaryOp::InstallFlow, rule.to_string())
            .map_err(|reason| ApplyError::FlowInstallFailed {
                switch: rule.switch.clone(),
                rule: rule.flow_spec(),
                reason,
            })?;
        state
            .flows
            .entry(rule.switch.clone())
            .or_default()
            .insert(rule.flow_match, rule.clone());
        Ok(Ack::new(BoundaryOp::InstallFlow, rule.flow_spec()))
    }

    async fn remove_flow(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        state
            .enter(BoundaryOp::RemoveFlow, rule.to_string())
            .map_err(|reason| ApplyError::TeardownFailed {
                entity: rule.to_string(),
                reason,
            })?;
        if let Some(table) = state.flows.get_mut(&rule.switch) {
            table.remove(&rule.flow_match);
        }
        Ok(Ack::new(BoundaryOp::RemoveFlow, rule.flow_match.to_string()))
    }

    async fn dump_flows(&mut self, switch: &str) -> Result<Vec<FlowRule>, ApplyError> {
        let mut state = self.state();
        state
            .enter(BoundaryOp::DumpFlows, switch.to_string())
            .map_err(|reason| ApplyError::DumpFailed {
                switch: switch.to_string(),
                reason,
            })?;
        Ok(state
            .flows
            .get(switch)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn tag_vlan(&mut self, host: &str, iface: &str, vlan: VlanId) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        let sub = vlan.sub_interface(iface);
        state
            .enter(BoundaryOp::TagVlan, format!("{}:{}", host, sub))
            .map_err(|reason| ApplyError::VlanTagFailed {
                host: host.to_string(),
                iface: iface.to_string(),
                vlan,
                reason,
            })?;
        // The parent loses its addresses
        state
            .addresses
            .remove(&(host.to_string(), iface.to_string()));
        state.vlan_tags.insert((host.to_string(), sub.clone()));
        Ok(Ack::new(BoundaryOp::TagVlan, sub))
    }

    async fn untag_vlan(
        &mut self,
        host: &str,
        iface: &str,
        vlan: VlanId,
    ) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        let sub = vlan.sub_interface(iface);
        state
            .enter(BoundaryOp::UntagVlan, format!("{}:{}", host, sub))
            .map_err(|reason| ApplyError::TeardownFailed {
                entity: format!("{}:{}", host, sub),
                reason,
            })?;
        let key = (host.to_string(), sub);
        state.addresses.remove(&key);
        state.vlan_tags.remove(&key);
        Ok(Ack::new(BoundaryOp::UntagVlan, key.1))
    }

    async fn set_interface_address(
        &mut self,
        host: &str,
        iface: &str,
        address: &IpPrefix,
    ) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        state
            .enter(
                BoundaryOp::SetInterfaceAddress,
                format!("{}:{} {}", host, iface, address),
            )
            .map_err(|reason| ApplyError::AddressSetFailed {
                host: host.to_string(),
                iface: iface.to_string(),
                reason,
            })?;
        state
            .addresses
            .insert((host.to_string(), iface.to_string()), *address);
        Ok(Ack::new(BoundaryOp::SetInterfaceAddress, address.to_string()))
    }

    async fn set_default_route(&mut self, host: &str, gateway: IpAddr) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        state
            .enter(BoundaryOp::SetDefaultRoute, format!("{} via {}", host, gateway))
            .map_err(|reason| ApplyError::RouteSetFailed {
                host: host.to_string(),
                reason,
            })?;
        state.routes.insert(host.to_string(), gateway);
        Ok(Ack::new(BoundaryOp::SetDefaultRoute, gateway.to_string()))
    }

    async fn create_host_vtep(&mut self, spec: &HostVtepSpec) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        let fail = |reason: String| ApplyError::HostVtepFailed {
            host: spec.host.clone(),
            iface: spec.iface.clone(),
            reason,
        };
        state
            .enter(
                BoundaryOp::CreateHostVtep,
                format!("{}:{} id={} dev={}", spec.host, spec.iface, spec.vni, spec.link),
            )
            .map_err(fail)?;
        if state.has_host_vtep(&spec.host, &spec.iface) {
            return Err(fail(format!("{} already exists", spec.iface)));
        }
        let key = (spec.host.clone(), spec.iface.clone());
        state.addresses.insert(key.clone(), spec.address);
        state.host_vteps.insert(key, spec.clone());
        Ok(Ack::new(BoundaryOp::CreateHostVtep, spec.iface.clone()))
    }

    async fn remove_host_vtep(&mut self, host: &str, iface: &str) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        state
            .enter(BoundaryOp::RemoveHostVtep, format!("{}:{}", host, iface))
            .map_err(|reason| ApplyError::TeardownFailed {
                entity: format!("{}:{}", host, iface),
                reason,
            })?;
        // Addresses and static entries go with the device
        let key = (host.to_string(), iface.to_string());
        state.host_vteps.remove(&key);
        state.addresses.remove(&key);
        state.neighbors.retain(|(h, i, _), _| !(h == host && i == iface));
        state.fdb.retain(|(h, i, _), _| !(h == host && i == iface));
        Ok(Ack::new(BoundaryOp::RemoveHostVtep, iface))
    }

    async fn set_static_neighbor(&mut self, entry: &StaticNeighbor) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        let fail = |reason: String| ApplyError::NeighborSetFailed {
            host: entry.host.clone(),
            iface: entry.iface.clone(),
            reason,
        };
        state
            .enter(
                BoundaryOp::SetStaticNeighbor,
                format!("{}:{} {} lladdr {}", entry.host, entry.iface, entry.address, entry.mac),
            )
            .map_err(fail)?;
        if !state.has_host_vtep(&entry.host, &entry.iface) {
            return Err(fail(format!("no device {}", entry.iface)));
        }
        state.neighbors.insert(
            (entry.host.clone(), entry.iface.clone(), entry.address),
            entry.clone(),
        );
        Ok(Ack::new(BoundaryOp::SetStaticNeighbor, entry.address.to_string()))
    }

    async fn set_static_fdb(&mut self, entry: &StaticFdb) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        let fail = |reason: String| ApplyError::FdbSetFailed {
            host: entry.host.clone(),
            iface: entry.iface.clone(),
            reason,
        };
        state
            .enter(
                BoundaryOp::SetStaticFdb,
                format!(
                    "{}:{} {} dst {} vni {}",
                    entry.host, entry.iface, entry.mac, entry.dst, entry.vni
                ),
            )
            .map_err(fail)?;
        if !state.has_host_vtep(&entry.host, &entry.iface) {
            return Err(fail(format!("no device {}", entry.iface)));
        }
        state.fdb.insert(
            (entry.host.clone(), entry.iface.clone(), entry.mac),
            entry.clone(),
        );
        Ok(Ack::new(BoundaryOp::SetStaticFdb, entry.mac.to_string()))
    }

    async fn set_forwarding(&mut self, node: &str, enabled: bool) -> Result<Ack, ApplyError> {
        let mut state = self.state();
        let value = if enabled { "1" } else { "0" };
        state
            .enter(BoundaryOp::SetForwarding, format!("{} ip_forward={}", node, value))
            .map_err(|reason| ApplyError::ForwardingSetFailed {
                node: node.to_string(),
                reason,
            })?;
        state.forwarding.insert(node.to_string(), enabled);
        Ok(Ack::new(BoundaryOp::SetForwarding, value))
    }
}
