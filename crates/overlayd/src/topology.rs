//! Topology model: hosts, switches, routers and the links between them.
//!
//! Purely in memory. Physical switch ports are numbered from 1 in the order
//! links are added, and never renumbered. Once a tunnel is defined on a
//! switch its physical port space is frozen, so every tunnel port stays
//! above every physical port.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use tracing::debug;

use overlay_common::{EntityKind, OverlayError, OverlayResult};
use overlay_types::{IpPrefix, MacAddress, PortNo, VlanId, Vni};

/// Handle to a host in one [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostRef(usize);

/// Handle to a switch in one [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchRef(usize);

/// Handle to a router in one [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterRef(usize);

/// Either end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Host(HostRef),
    Switch(SwitchRef),
    Router(RouterRef),
}

impl From<HostRef> for NodeRef {
    fn from(host: HostRef) -> Self {
        NodeRef::Host(host)
    }
}

impl From<SwitchRef> for NodeRef {
    fn from(switch: SwitchRef) -> Self {
        NodeRef::Switch(switch)
    }
}

impl From<RouterRef> for NodeRef {
    fn from(router: RouterRef) -> Self {
        NodeRef::Router(router)
    }
}

/// A host's membership in one VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanBinding {
    pub vlan: VlanId,
}

/// An emulated host.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    /// Link interface (`<host>-eth0`), set once the host is linked.
    pub iface: Option<String>,
    pub vlan: Option<VlanBinding>,
    pub address: Option<IpPrefix>,
    pub default_route: Option<IpAddr>,
    pub vtep: Option<HostVtep>,
}

impl Host {
    /// The interface that carries the host's address: the VLAN
    /// sub-interface when the host is tagged, the raw link otherwise.
    pub fn effective_iface(&self) -> Option<String> {
        let iface = self.iface.as_deref()?;
        Some(match self.vlan {
            Some(binding) => binding.vlan.sub_interface(iface),
            None => iface.to_string(),
        })
    }
}

/// A kernel VXLAN device on a host, carried over the host's link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVtep {
    /// `vtep<n>`, numbered from 1 in the order devices are declared.
    pub iface: String,
    pub vni: Vni,
    pub mac: MacAddress,
    /// Overlay address assigned to the device.
    pub address: IpPrefix,
}

/// A node that forwards between its links.
#[derive(Debug, Clone)]
pub struct Router {
    pub name: String,
    /// `<router>-eth<n>` from 0, in link order.
    ifaces: Vec<String>,
    addresses: Vec<IpPrefix>,
    pub forwarding: bool,
}

impl Router {
    /// Interfaces in link order, each with the address assigned to it.
    pub fn interfaces(&self) -> impl Iterator<Item = (&str, Option<&IpPrefix>)> {
        self.ifaces
            .iter()
            .enumerate()
            .map(|(i, iface)| (iface.as_str(), self.addresses.get(i)))
    }

    pub fn addresses(&self) -> &[IpPrefix] {
        &self.addresses
    }
}

/// One physical port on a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPort {
    pub iface: String,
    pub peer: NodeRef,
}

/// An emulated switch.
#[derive(Debug, Clone)]
pub struct Switch {
    pub name: String,
    ports: BTreeMap<PortNo, SwitchPort>,
    frozen: bool,
}

impl Switch {
    pub fn physical_ports(&self) -> impl Iterator<Item = (PortNo, &SwitchPort)> {
        self.ports.iter().map(|(port, p)| (*port, p))
    }

    pub fn has_physical_port(&self, port: PortNo) -> bool {
        self.ports.contains_key(&port)
    }

    pub fn highest_physical_port(&self) -> Option<PortNo> {
        self.ports.keys().next_back().copied()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// In-memory graph of one emulated network.
///
/// A topology is opened by [`Topology::open`] and stays usable until
/// [`Topology::close`]. Every managed network owns its own instance.
#[derive(Debug, Clone)]
pub struct Topology {
    name: String,
    hosts: Vec<Host>,
    switches: Vec<Switch>,
    routers: Vec<Router>,
    names: HashMap<String, NodeRef>,
    links: Vec<(NodeRef, NodeRef)>,
    open: bool,
}

impl Topology {
    /// Opens an empty topology.
    pub fn open(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: Vec::new(),
            switches: Vec::new(),
            routers: Vec::new(),
            names: HashMap::new(),
            links: Vec::new(),
            open: true,
        }
    }

    /// Builds the VLAN star: one switch `s1` and `k` hosts `h1..hk`, host
    /// `i` tagged into VLAN `vlan_base + i - 1`.
    pub fn vlan_star(k: u16, vlan_base: VlanId) -> OverlayResult<Self> {
        let mut topo = Self::open("vlan-star");
        let s1 = topo.add_switch("s1")?;
        for i in 0..k {
            let vlan = vlan_base.checked_add(i).ok_or_else(|| {
                OverlayError::invalid_config("vlan_base", format!("{} + {} out of range", vlan_base, i))
            })?;
            let h = topo.add_host(format!("h{}", i + 1), Some(vlan), None)?;
            topo.add_link(h, s1)?;
        }
        Ok(topo)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Closes the topology. Further mutation fails with [`OverlayError::Closed`].
    pub fn close(&mut self) {
        self.open = false;
        debug!(topology = %self.name, "Topology closed");
    }

    fn ensure_open(&self) -> OverlayResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(OverlayError::Closed)
        }
    }

    fn ensure_unique(&self, name: &str, kind: EntityKind) -> OverlayResult<()> {
        if self.names.contains_key(name) {
            return Err(OverlayError::duplicate(kind, name));
        }
        Ok(())
    }

    /// Adds a host, optionally tagged into a VLAN and addressed.
    pub fn add_host(
        &mut self,
        name: impl Into<String>,
        vlan: Option<VlanId>,
        address: Option<IpPrefix>,
    ) -> OverlayResult<HostRef> {
        self.ensure_open()?;
        let name = name.into();
        self.ensure_unique(&name, EntityKind::Host)?;

        let host_ref = HostRef(self.hosts.len());
        self.hosts.push(Host {
            name: name.clone(),
            iface: None,
            vlan: vlan.map(|vlan| VlanBinding { vlan }),
            address,
            default_route: None,
            vtep: None,
        });
        self.names.insert(name, NodeRef::Host(host_ref));
        Ok(host_ref)
    }

    /// Sets the gateway a host's default route points at.
    pub fn set_default_route(&mut self, host: HostRef, gateway: IpAddr) -> OverlayResult<()> {
        self.ensure_open()?;
        let host = self
            .hosts
            .get_mut(host.0)
            .ok_or_else(|| OverlayError::unknown(EntityKind::Host, format!("#{}", host.0)))?;
        host.default_route = Some(gateway);
        Ok(())
    }

    pub fn add_switch(&mut self, name: impl Into<String>) -> OverlayResult<SwitchRef> {
        self.ensure_open()?;
        let name = name.into();
        self.ensure_unique(&name, EntityKind::Switch)?;

        let switch_ref = SwitchRef(self.switches.len());
        self.switches.push(Switch {
            name: name.clone(),
            ports: BTreeMap::new(),
            frozen: false,
        });
        self.names.insert(name, NodeRef::Switch(switch_ref));
        Ok(switch_ref)
    }

    /// Adds a router. The i-th address goes on its i-th interface.
    pub fn add_router(
        &mut self,
        name: impl Into<String>,
        addresses: Vec<IpPrefix>,
        forwarding: bool,
    ) -> OverlayResult<RouterRef> {
        self.ensure_open()?;
        let name = name.into();
        self.ensure_unique(&name, EntityKind::Router)?;

        let router_ref = RouterRef(self.routers.len());
        self.routers.push(Router {
            name: name.clone(),
            ifaces: Vec::new(),
            addresses,
            forwarding,
        });
        self.names.insert(name, NodeRef::Router(router_ref));
        Ok(router_ref)
    }

    /// Gives a linked host a kernel VXLAN device.
    ///
    /// A host carries at most one device, and device MACs must be unicast
    /// and distinct across the topology.
    pub fn add_host_vtep(
        &mut self,
        host: HostRef,
        vni: Vni,
        mac: MacAddress,
        address: IpPrefix,
    ) -> OverlayResult<&HostVtep> {
        self.ensure_open()?;
        self.check_ref(NodeRef::Host(host))?;
        let name = self.hosts[host.0].name.clone();
        if self.hosts[host.0].vtep.is_some() {
            return Err(OverlayError::invalid_config(
                "vtep",
                format!("host '{}' already has a vtep", name),
            ));
        }
        if !mac.is_unicast() {
            return Err(OverlayError::invalid_config(
                "vtep.mac",
                format!("{} is not a unicast address", mac),
            ));
        }
        if let Some(owner) = self.host_vteps().find(|(_, v)| v.mac == mac) {
            return Err(OverlayError::invalid_config(
                "vtep.mac",
                format!("{} already used by host '{}'", mac, owner.0.name),
            ));
        }

        let iface = format!("vtep{}", self.host_vteps().count() + 1);
        debug!(host = %name, iface = %iface, vni = %vni, "Host vtep added");
        let vtep = self.hosts[host.0].vtep.insert(HostVtep {
            iface,
            vni,
            mac,
            address,
        });
        Ok(&*vtep)
    }

    /// Links two existing nodes.
    ///
    /// Switch ends get the next port number, host ends get `<host>-eth0` and
    /// router ends get their next `<router>-eth<n>`.
    pub fn add_link(&mut self, a: impl Into<NodeRef>, b: impl Into<NodeRef>) -> OverlayResult<()> {
        self.ensure_open()?;
        let (a, b) = (a.into(), b.into());
        self.check_ref(a)?;
        self.check_ref(b)?;
        if a == b {
            return Err(OverlayError::invalid_config(
                "link",
                format!("'{}' cannot be linked to itself", self.node_name(a)),
            ));
        }

        // Validate both ends before touching either
        for node in [a, b] {
            match node {
                NodeRef::Host(h) => {
                    let host = &self.hosts[h.0];
                    if host.iface.is_some() {
                        return Err(OverlayError::HostAlreadyLinked {
                            host: host.name.clone(),
                        });
                    }
                }
                NodeRef::Switch(s) => {
                    let switch = &self.switches[s.0];
                    if switch.frozen {
                        return Err(OverlayError::PortSpaceFrozen {
                            switch: switch.name.clone(),
                        });
                    }
                }
                NodeRef::Router(_) => {}
            }
        }

        self.attach(a, b)?;
        self.attach(b, a)?;
        self.links.push((a, b));
        debug!(
            a = %self.node_name(a),
            b = %self.node_name(b),
            "Link added"
        );
        Ok(())
    }

    fn attach(&mut self, node: NodeRef, peer: NodeRef) -> OverlayResult<()> {
        match node {
            NodeRef::Host(h) => {
                let host = &mut self.hosts[h.0];
                host.iface = Some(format!("{}-eth0", host.name));
            }
            NodeRef::Switch(s) => {
                let switch = &mut self.switches[s.0];
                let port = match switch.highest_physical_port() {
                    Some(highest) => highest.next().ok_or_else(|| OverlayError::PortsExhausted {
                        switch: switch.name.clone(),
                    })?,
                    None => PortNo::new(PortNo::MIN)?,
                };
                let iface = format!("{}-eth{}", switch.name, port);
                switch.ports.insert(port, SwitchPort { iface, peer });
            }
            NodeRef::Router(r) => {
                let router = &mut self.routers[r.0];
                let iface = format!("{}-eth{}", router.name, router.ifaces.len());
                router.ifaces.push(iface);
            }
        }
        Ok(())
    }

    fn check_ref(&self, node: NodeRef) -> OverlayResult<()> {
        match node {
            NodeRef::Host(h) if h.0 >= self.hosts.len() => Err(OverlayError::unknown(
                EntityKind::Host,
                format!("#{}", h.0),
            )),
            NodeRef::Switch(s) if s.0 >= self.switches.len() => Err(OverlayError::unknown(
                EntityKind::Switch,
                format!("#{}", s.0),
            )),
            NodeRef::Router(r) if r.0 >= self.routers.len() => Err(OverlayError::unknown(
                EntityKind::Router,
                format!("#{}", r.0),
            )),
            _ => Ok(()),
        }
    }

    fn node_name(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Host(h) => &self.hosts[h.0].name,
            NodeRef::Switch(s) => &self.switches[s.0].name,
            NodeRef::Router(r) => &self.routers[r.0].name,
        }
    }

    /// Freezes a switch's physical ports. Called when its first tunnel is defined.
    pub(crate) fn freeze_ports(&mut self, switch: &str) -> OverlayResult<()> {
        let s = self.switch_ref(switch)?;
        self.switches[s.0].frozen = true;
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<NodeRef> {
        self.names.get(name).copied()
    }

    pub fn host_ref(&self, name: &str) -> OverlayResult<HostRef> {
        match self.names.get(name) {
            Some(NodeRef::Host(h)) => Ok(*h),
            _ => Err(OverlayError::unknown(EntityKind::Host, name)),
        }
    }

    pub fn switch_ref(&self, name: &str) -> OverlayResult<SwitchRef> {
        match self.names.get(name) {
            Some(NodeRef::Switch(s)) => Ok(*s),
            _ => Err(OverlayError::unknown(EntityKind::Switch, name)),
        }
    }

    pub fn host(&self, name: &str) -> OverlayResult<&Host> {
        self.host_ref(name).map(|h| &self.hosts[h.0])
    }

    pub fn switch(&self, name: &str) -> OverlayResult<&Switch> {
        self.switch_ref(name).map(|s| &self.switches[s.0])
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.iter()
    }

    pub fn routers(&self) -> impl Iterator<Item = &Router> {
        self.routers.iter()
    }

    /// Hosts with a kernel VXLAN device, in declaration order.
    pub fn host_vteps(&self) -> impl Iterator<Item = (&Host, &HostVtep)> {
        self.hosts
            .iter()
            .filter_map(|host| host.vtep.as_ref().map(|vtep| (host, vtep)))
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn highest_physical_port(&self, switch: &str) -> OverlayResult<Option<PortNo>> {
        Ok(self.switch(switch)?.highest_physical_port())
    }

    /// The switch port facing the host or router called `node`.
    ///
    /// When a node has several links to the switch, the lowest port wins.
    pub fn port_towards(&self, switch: &str, node: &str) -> OverlayResult<PortNo> {
        let sw = self.switch(switch)?;
        let peer = self
            .node(node)
            .ok_or_else(|| OverlayError::unknown(EntityKind::Host, node))?;
        sw.physical_ports()
            .find(|(_, p)| p.peer == peer)
            .map(|(port, _)| port)
            .ok_or_else(|| {
                OverlayError::invalid_config(
                    "binding",
                    format!("'{}' is not linked to switch '{}'", node, switch),
                )
            })
    }
}
