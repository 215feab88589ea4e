//! Setup session: builds a blueprint and applies it in one linear sequence.

use tracing::{error, info, instrument, warn};

use overlay_common::{ApplyError, ControlSurface, OverlayResult};
use overlay_types::PortNo;

use crate::blueprint::Blueprint;
use crate::config::OverlayConfig;
use crate::driver::{Convergence, Driver, JournalEntry, TeardownReport};
use crate::flow_plan::FlowPlan;
use crate::topology::Topology;
use crate::tunnel_registry::TunnelRegistry;

/// One managed network and the driver that applied it.
pub struct Session<S> {
    blueprint: Blueprint,
    driver: Driver<S>,
}

impl<S: ControlSurface> Session<S> {
    /// Builds the topology and applies it.
    ///
    /// Order: host VLAN tags, addresses and default routes, then router
    /// addresses and forwarding, then host VTEPs with their static
    /// entries, then tunnel ports, then every rule pair. On the first boundary failure the
    /// session tears down what it applied and returns that failure.
    #[instrument(skip(config, surface), fields(topology = %config.name))]
    pub async fn setup(config: &OverlayConfig, surface: S) -> OverlayResult<Self> {
        let blueprint = Blueprint::build(config)?;
        let mut session = Self {
            blueprint,
            driver: Driver::new(surface),
        };

        match session.apply_all().await {
            Ok(()) => {
                info!(
                    rules = session.blueprint.plan.rules().count(),
                    "Overlay applied"
                );
                Ok(session)
            }
            Err(e) => {
                error!(error = %e, "Setup failed, tearing down");
                session.driver.teardown().await;
                Err(e)
            }
        }
    }

    /// Session over an already applied network. Its journal holds every
    /// declared entity so verify and teardown can act on it.
    pub fn attach(config: &OverlayConfig, surface: S) -> OverlayResult<Self> {
        let blueprint = Blueprint::build(config)?;
        let mut driver = Driver::new(surface);

        for host in blueprint.topology.hosts() {
            if let (Some(iface), Some(binding)) = (&host.iface, host.vlan) {
                driver.record(JournalEntry::VlanTag {
                    host: host.name.clone(),
                    iface: iface.clone(),
                    vlan: binding.vlan,
                });
            }
        }
        for router in blueprint.topology.routers().filter(|r| r.forwarding) {
            driver.record(JournalEntry::Forwarding {
                node: router.name.clone(),
            });
        }
        for vtep in &blueprint.host_vteps {
            driver.record(JournalEntry::HostVtep {
                host: vtep.spec.host.clone(),
                iface: vtep.spec.iface.clone(),
            });
        }
        for endpoint in blueprint.endpoints() {
            driver.record(JournalEntry::TunnelPort {
                switch: endpoint.switch.clone(),
                iface: endpoint.iface.clone(),
                port: endpoint.port,
            });
        }
        for rule in blueprint.plan.rules() {
            driver.record(JournalEntry::Flow(rule.clone()));
        }
        Ok(Self { blueprint, driver })
    }

    async fn apply_all(&mut self) -> OverlayResult<()> {
        let Self { blueprint, driver } = self;

        for host in blueprint.topology.hosts() {
            let Some(link) = host.iface.as_deref() else {
                if host.address.is_some() {
                    warn!(host = %host.name, "Host has an address but no link, skipping");
                }
                continue;
            };
            if let Some(binding) = host.vlan {
                driver.tag_vlan(&host.name, link, binding.vlan).await?;
            }
            if let (Some(address), Some(iface)) = (&host.address, host.effective_iface()) {
                driver.set_address(&host.name, &iface, address).await?;
            }
            if let Some(gateway) = host.default_route {
                driver.set_default_route(&host.name, gateway).await?;
            }
        }

        for router in blueprint.topology.routers() {
            for (iface, address) in router.interfaces() {
                if let Some(address) = address {
                    driver.set_address(&router.name, iface, address).await?;
                }
            }
            if router.forwarding {
                driver.set_forwarding(&router.name, true).await?;
            }
        }

        for vtep in &blueprint.host_vteps {
            driver.create_host_vtep(&vtep.spec).await?;
            for neighbor in &vtep.neighbors {
                driver.set_static_neighbor(neighbor).await?;
            }
            for entry in &vtep.fdb {
                driver.set_static_fdb(entry).await?;
            }
        }

        for endpoint in blueprint.registry.all() {
            driver.create_tunnel(endpoint).await?;
        }

        for pair in blueprint.plan.bindings() {
            driver.apply_pair(pair).await.into_result()?;
        }
        for patch in blueprint.plan.patches() {
            driver.apply_patch(patch).await?;
        }
        Ok(())
    }

    pub fn topology(&self) -> &Topology {
        &self.blueprint.topology
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.blueprint.registry
    }

    pub fn plan(&self) -> &FlowPlan {
        &self.blueprint.plan
    }

    pub fn driver(&self) -> &Driver<S> {
        &self.driver
    }

    pub fn surface(&self) -> &S {
        self.driver.surface()
    }

    /// Retracts a tunnel: its bindings first, then the port.
    ///
    /// A binding leaves the plan only once both of its rules are off the
    /// switch. On failure the plan still names whatever may remain, so
    /// `verify` reports it and the call can be repeated.
    #[instrument(skip(self))]
    pub async fn remove_tunnel(&mut self, switch: &str, port: PortNo) -> OverlayResult<()> {
        let endpoint = self.blueprint.registry.endpoint(switch, port)?.clone();

        for pair in self.blueprint.plan.bindings_for_tunnel(switch, port) {
            self.driver.remove_pair(&pair).await?;
            self.blueprint.plan.remove_binding(&pair);
        }
        self.driver.remove_tunnel(&endpoint).await?;
        self.blueprint.registry.remove(switch, port);
        self.blueprint.tunnels.retain(|_, (s, p)| !(s.as_str() == switch && *p == port));
        Ok(())
    }

    /// Reads back every switch and diffs it against the plan.
    pub async fn verify(&mut self) -> Result<Vec<Convergence>, ApplyError> {
        let switches: Vec<String> = self
            .blueprint
            .topology
            .switches()
            .map(|s| s.name.clone())
            .collect();
        let mut report = Vec::with_capacity(switches.len());
        for switch in switches {
            let convergence = self
                .driver
                .verify(&switch, self.blueprint.plan.rules_for(&switch))
                .await?;
            report.push(convergence);
        }
        Ok(report)
    }

    /// Undoes everything applied and closes the topology. Safe to repeat.
    pub async fn teardown(&mut self) -> TeardownReport {
        let report = self.driver.teardown().await;
        self.blueprint.topology.close();
        report
    }

    pub fn into_surface(self) -> S {
        self.driver.into_surface()
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("topology", &self.blueprint.topology.name())
            .finish()
    }
}

