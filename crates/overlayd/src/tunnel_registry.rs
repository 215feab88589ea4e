//! Tunnel registry: VTEP definitions and tunnel port allocation.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use tracing::info;

use overlay_common::{OverlayError, OverlayResult, TunnelMode, TunnelPortSpec};
use overlay_types::{PortNo, Vni};

use crate::topology::Topology;

/// Lowest tunnel port number when a switch has few physical ports.
pub const DEFAULT_TUNNEL_PORT_FLOOR: u16 = 9;

/// A VXLAN tunnel endpoint owned by one switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    pub switch: String,
    /// Interface name, `<switch>-vtep<n>`.
    pub iface: String,
    pub port: PortNo,
    pub remote: IpAddr,
    pub mode: TunnelMode,
}

impl TunnelEndpoint {
    /// Boundary parameters for `create-switch-port`.
    pub fn spec(&self) -> TunnelPortSpec {
        TunnelPortSpec {
            switch: self.switch.clone(),
            iface: self.iface.clone(),
            port: self.port,
            remote: self.remote,
            mode: self.mode,
        }
    }
}

/// Outcome of [`TunnelRegistry::define_tunnel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelDefinition {
    pub port: PortNo,
    /// False when an identical tunnel already existed.
    pub created: bool,
}

/// Where the next tunnel port of a switch comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum PortCursor {
    /// No tunnel allocated yet; start above the physical ports.
    #[default]
    Unstarted,
    Next(PortNo),
    /// [`PortNo::MAX`] was handed out.
    Exhausted,
}

#[derive(Debug, Default)]
struct SwitchTunnels {
    cursor: PortCursor,
    next_seq: u32,
    by_port: BTreeMap<PortNo, TunnelEndpoint>,
    by_key: HashMap<(IpAddr, TunnelMode), PortNo>,
}

/// Tracks every tunnel of one topology.
#[derive(Debug)]
pub struct TunnelRegistry {
    floor: u16,
    switches: HashMap<String, SwitchTunnels>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::with_floor(DEFAULT_TUNNEL_PORT_FLOOR)
    }

    /// Registry whose first tunnel port is at least `floor`.
    pub fn with_floor(floor: u16) -> Self {
        Self {
            floor,
            switches: HashMap::new(),
        }
    }

    /// Defines a tunnel from `switch` to `remote`.
    ///
    /// `vni` set: fixed-VNI tunnel. `vni` omitted: flow-based tunnel whose
    /// VNI is chosen by each rule. Redefining the same `(switch, remote, vni)`
    /// returns the existing port with `created == false`.
    pub fn define_tunnel(
        &mut self,
        topology: &mut Topology,
        switch: &str,
        remote: IpAddr,
        vni: Option<Vni>,
    ) -> OverlayResult<TunnelDefinition> {
        if !topology.is_open() {
            return Err(OverlayError::Closed);
        }
        let highest_physical = topology.highest_physical_port(switch)?;
        let mode = TunnelMode::from_vni(vni);

        let tunnels = self.switches.entry(switch.to_string()).or_default();

        if let Some(port) = tunnels.by_key.get(&(remote, mode)) {
            return Ok(TunnelDefinition {
                port: *port,
                created: false,
            });
        }

        if let Some(vni) = vni {
            if let Some(existing) = tunnels
                .by_port
                .values()
                .find(|t| t.mode.fixed_vni() == Some(vni))
            {
                return Err(OverlayError::VniAlreadyBound {
                    switch: switch.to_string(),
                    vni,
                    port: existing.port,
                });
            }
        }

        let exhausted = || OverlayError::PortsExhausted {
            switch: switch.to_string(),
        };
        let port = match tunnels.cursor {
            PortCursor::Next(port) => port,
            PortCursor::Exhausted => return Err(exhausted()),
            PortCursor::Unstarted => {
                let above_physical = highest_physical.map_or(PortNo::MIN, |p| {
                    p.as_u16().saturating_add(1)
                });
                PortNo::new(above_physical.max(self.floor)).map_err(|_| exhausted())?
            }
        };
        if tunnels.by_port.contains_key(&port) {
            return Err(exhausted());
        }
        tunnels.cursor = port.next().map_or(PortCursor::Exhausted, PortCursor::Next);
        tunnels.next_seq += 1;

        let endpoint = TunnelEndpoint {
            switch: switch.to_string(),
            iface: format!("{}-vtep{}", switch, tunnels.next_seq),
            port,
            remote,
            mode,
        };
        info!(
            switch = %switch,
            iface = %endpoint.iface,
            port = %port,
            remote = %remote,
            key = %mode.key(),
            "Tunnel defined"
        );
        tunnels.by_key.insert((remote, mode), port);
        tunnels.by_port.insert(port, endpoint);

        topology.freeze_ports(switch)?;

        Ok(TunnelDefinition {
            port,
            created: true,
        })
    }

    pub fn tunnel(&self, switch: &str, port: PortNo) -> Option<&TunnelEndpoint> {
        self.switches.get(switch)?.by_port.get(&port)
    }

    /// Tunnel endpoint behind `port`, failing if there is none.
    pub fn endpoint(&self, switch: &str, port: PortNo) -> OverlayResult<&TunnelEndpoint> {
        self.tunnel(switch, port)
            .ok_or_else(|| OverlayError::UnknownTunnelPort {
                switch: switch.to_string(),
                port,
            })
    }

    /// Checks that `vni` may be carried by tunnel `port` on `switch`.
    pub fn check_vni(
        &self,
        switch: &str,
        port: PortNo,
        vni: Vni,
    ) -> OverlayResult<&TunnelEndpoint> {
        let endpoint = self.endpoint(switch, port)?;
        match endpoint.mode {
            TunnelMode::Fixed(bound) if bound != vni => Err(OverlayError::VniMismatch {
                switch: switch.to_string(),
                port,
                bound,
                requested: vni,
            }),
            _ => Ok(endpoint),
        }
    }

    pub fn tunnels(&self, switch: &str) -> impl Iterator<Item = &TunnelEndpoint> {
        self.switches
            .get(switch)
            .into_iter()
            .flat_map(|t| t.by_port.values())
    }

    /// All tunnels, ordered by switch name then port.
    pub fn all(&self) -> Vec<&TunnelEndpoint> {
        let mut names: Vec<_> = self.switches.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| self.switches[name].by_port.values())
            .collect()
    }

    /// Forgets a tunnel. Its port number is not handed out again.
    pub fn remove(&mut self, switch: &str, port: PortNo) -> Option<TunnelEndpoint> {
        let tunnels = self.switches.get_mut(switch)?;
        let endpoint = tunnels.by_port.remove(&port)?;
        tunnels.by_key.remove(&(endpoint.remote, endpoint.mode));
        info!(switch = %switch, port = %port, "Tunnel removed");
        Some(endpoint)
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
