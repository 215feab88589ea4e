//! Apply/verify driver.
//!
//! Pushes planned rules and tunnels through a [`ControlSurface`] and keeps a
//! journal of everything that succeeded, so a teardown undoes exactly that.
//! The driver never retries and never rolls back on its own.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use tracing::{debug, info, instrument, warn};

use overlay_common::{
    Ack, ApplyError, BindingPair, ControlSurface, FlowRule, HostVtepSpec, OverlayError,
    OverlayResult, PatchPair, StaticFdb, StaticNeighbor,
};
use overlay_types::{IpPrefix, PortNo, VlanId};

use crate::tunnel_registry::TunnelEndpoint;

/// One thing the driver created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    TunnelPort {
        switch: String,
        iface: String,
        port: PortNo,
    },
    Flow(FlowRule),
    VlanTag {
        host: String,
        iface: String,
        vlan: VlanId,
    },
    Address {
        host: String,
        iface: String,
        address: IpPrefix,
    },
    DefaultRoute {
        host: String,
        gateway: IpAddr,
    },
    HostVtep {
        host: String,
        iface: String,
    },
    Neighbor(StaticNeighbor),
    Fdb(StaticFdb),
    /// IP forwarding switched on at a router.
    Forwarding {
        node: String,
    },
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalEntry::TunnelPort { switch, iface, port } => {
                write!(f, "tunnel port {} ({}) on {}", iface, port, switch)
            }
            JournalEntry::Flow(rule) => write!(f, "flow {}", rule),
            JournalEntry::VlanTag { host, iface, vlan } => {
                write!(f, "vlan {} on {}:{}", vlan, host, iface)
            }
            JournalEntry::Address {
                host,
                iface,
                address,
            } => write!(f, "address {} on {}:{}", address, host, iface),
            JournalEntry::DefaultRoute { host, gateway } => {
                write!(f, "default route via {} on {}", gateway, host)
            }
            JournalEntry::HostVtep { host, iface } => write!(f, "vtep {} on {}", iface, host),
            JournalEntry::Neighbor(n) => {
                write!(f, "neighbor {} lladdr {} on {}:{}", n.address, n.mac, n.host, n.iface)
            }
            JournalEntry::Fdb(e) => {
                write!(f, "fdb {} dst {} on {}:{}", e.mac, e.dst, e.host, e.iface)
            }
            JournalEntry::Forwarding { node } => write!(f, "ip forwarding on {}", node),
        }
    }
}

/// Result of applying one rule.
#[derive(Debug)]
pub struct RuleOutcome {
    pub rule: FlowRule,
    pub result: Result<Ack, ApplyError>,
}

impl RuleOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Results of both halves of a binding pair.
#[derive(Debug)]
pub struct PairOutcome {
    pub inbound: RuleOutcome,
    pub outbound: RuleOutcome,
}

impl PairOutcome {
    pub fn is_complete(&self) -> bool {
        self.inbound.is_ok() && self.outbound.is_ok()
    }

    /// Folds both results into one.
    ///
    /// Exactly one half applied yields
    /// [`OverlayError::InconsistentBindingState`] naming the missing rule.
    pub fn into_result(self) -> OverlayResult<()> {
        settle(self.inbound, self.outbound)
    }
}

fn settle(first: RuleOutcome, second: RuleOutcome) -> OverlayResult<()> {
    match (first.result, second.result) {
        (Ok(_), Ok(_)) => Ok(()),
        (Ok(_), Err(source)) => Err(OverlayError::InconsistentBindingState {
            applied: first.rule,
            missing: second.rule,
            source,
        }),
        (Err(source), Ok(_)) => Err(OverlayError::InconsistentBindingState {
            applied: second.rule,
            missing: first.rule,
            source,
        }),
        (Err(source), Err(_)) => Err(OverlayError::Apply(source)),
    }
}

/// Difference between a switch's flow table and the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Convergence {
    pub switch: String,
    /// Planned but absent.
    pub missing: Vec<FlowRule>,
    /// Present but not planned.
    pub unexpected: Vec<FlowRule>,
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// What a teardown undid and what it could not.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub removed: usize,
    pub skipped: usize,
    pub failed: Vec<(JournalEntry, ApplyError)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies intent through one control surface.
pub struct Driver<S> {
    surface: S,
    journal: Vec<JournalEntry>,
}

impl<S: ControlSurface> Driver<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            journal: Vec::new(),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Everything created so far, oldest first.
    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// Records an entry created outside this driver, so teardown covers it.
    pub fn record(&mut self, entry: JournalEntry) {
        if !self.journal.contains(&entry) {
            self.journal.push(entry);
        }
    }

    fn forget(&mut self, entry: &JournalEntry) {
        self.journal.retain(|e| e != entry);
    }

    /// Installs one rule.
    #[instrument(skip(self, rule), fields(rule = %rule))]
    pub async fn apply(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError> {
        let ack = self.surface.install_flow(rule).await?;
        debug!(surface = %self.surface.name(), "Flow installed");
        self.record(JournalEntry::Flow(rule.clone()));
        Ok(ack)
    }

    async fn apply_outcome(&mut self, rule: &FlowRule) -> RuleOutcome {
        let result = self.apply(rule).await;
        if let Err(e) = &result {
            warn!(rule = %rule, error = %e, "Flow install failed");
        }
        RuleOutcome {
            rule: rule.clone(),
            result,
        }
    }

    /// Applies both rules of a binding, inbound first. The outbound rule is
    /// attempted even when the inbound one fails.
    #[instrument(skip(self, pair), fields(rule = %pair.outbound))]
    pub async fn apply_pair(&mut self, pair: &BindingPair) -> PairOutcome {
        let inbound = self.apply_outcome(&pair.inbound).await;
        let outbound = self.apply_outcome(&pair.outbound).await;
        let outcome = PairOutcome { inbound, outbound };
        if outcome.is_complete() {
            info!("Binding applied");
        }
        outcome
    }

    /// Applies both directions of a patch.
    pub async fn apply_patch(&mut self, pair: &PatchPair) -> OverlayResult<()> {
        let forward = self.apply_outcome(&pair.forward).await;
        let reverse = self.apply_outcome(&pair.reverse).await;
        settle(forward, reverse)
    }

    /// Removes one rule. Removing a rule that is not installed succeeds.
    #[instrument(skip(self, rule), fields(rule = %rule))]
    pub async fn remove_rule(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError> {
        let ack = self.surface.remove_flow(rule).await?;
        self.forget(&JournalEntry::Flow(rule.clone()));
        Ok(ack)
    }

    /// Removes both rules of a binding, outbound first. Returns the first error.
    pub async fn remove_pair(&mut self, pair: &BindingPair) -> Result<(), ApplyError> {
        let outbound = self.remove_rule(&pair.outbound).await;
        let inbound = self.remove_rule(&pair.inbound).await;
        outbound.and(inbound).map(|_| ())
    }

    #[instrument(skip(self, endpoint), fields(switch = %endpoint.switch, iface = %endpoint.iface))]
    pub async fn create_tunnel(&mut self, endpoint: &TunnelEndpoint) -> Result<Ack, ApplyError> {
        let ack = self.surface.create_tunnel_port(&endpoint.spec()).await?;
        info!(port = %endpoint.port, remote = %endpoint.remote, "Tunnel port created");
        self.record(JournalEntry::TunnelPort {
            switch: endpoint.switch.clone(),
            iface: endpoint.iface.clone(),
            port: endpoint.port,
        });
        Ok(ack)
    }

    #[instrument(skip(self, endpoint), fields(switch = %endpoint.switch, iface = %endpoint.iface))]
    pub async fn remove_tunnel(&mut self, endpoint: &TunnelEndpoint) -> Result<Ack, ApplyError> {
        let ack = self
            .surface
            .remove_tunnel_port(&endpoint.switch, &endpoint.iface)
            .await?;
        self.forget(&JournalEntry::TunnelPort {
            switch: endpoint.switch.clone(),
            iface: endpoint.iface.clone(),
            port: endpoint.port,
        });
        info!("Tunnel port removed");
        Ok(ack)
    }

    pub async fn tag_vlan(
        &mut self,
        host: &str,
        iface: &str,
        vlan: VlanId,
    ) -> Result<Ack, ApplyError> {
        let ack = self.surface.tag_vlan(host, iface, vlan).await?;
        info!(host = %host, iface = %iface, vlan = %vlan, "Host tagged");
        self.record(JournalEntry::VlanTag {
            host: host.to_string(),
            iface: iface.to_string(),
            vlan,
        });
        Ok(ack)
    }

    pub async fn set_address(
        &mut self,
        host: &str,
        iface: &str,
        address: &IpPrefix,
    ) -> Result<Ack, ApplyError> {
        let ack = self
            .surface
            .set_interface_address(host, iface, address)
            .await?;
        info!(host = %host, iface = %iface, address = %address, "Address set");
        self.record(JournalEntry::Address {
            host: host.to_string(),
            iface: iface.to_string(),
            address: *address,
        });
        Ok(ack)
    }

    pub async fn set_default_route(
        &mut self,
        host: &str,
        gateway: IpAddr,
    ) -> Result<Ack, ApplyError> {
        let ack = self.surface.set_default_route(host, gateway).await?;
        info!(host = %host, gateway = %gateway, "Default route set");
        self.record(JournalEntry::DefaultRoute {
            host: host.to_string(),
            gateway,
        });
        Ok(ack)
    }

    #[instrument(skip(self, spec), fields(host = %spec.host, iface = %spec.iface))]
    pub async fn create_host_vtep(&mut self, spec: &HostVtepSpec) -> Result<Ack, ApplyError> {
        let ack = self.surface.create_host_vtep(spec).await?;
        info!(vni = %spec.vni, mac = %spec.mac, link = %spec.link, "Host vtep created");
        self.record(JournalEntry::HostVtep {
            host: spec.host.clone(),
            iface: spec.iface.clone(),
        });
        Ok(ack)
    }

    /// Removes a host VTEP along with the static entries it carried.
    #[instrument(skip(self))]
    pub async fn remove_host_vtep(&mut self, host: &str, iface: &str) -> Result<Ack, ApplyError> {
        let ack = self.surface.remove_host_vtep(host, iface).await?;
        self.journal.retain(|entry| match entry {
            JournalEntry::HostVtep { host: h, iface: i } => !(h == host && i == iface),
            JournalEntry::Neighbor(n) => !(n.host == host && n.iface == iface),
            JournalEntry::Fdb(e) => !(e.host == host && e.iface == iface),
            _ => true,
        });
        info!("Host vtep removed");
        Ok(ack)
    }

    pub async fn set_static_neighbor(
        &mut self,
        entry: &StaticNeighbor,
    ) -> Result<Ack, ApplyError> {
        let ack = self.surface.set_static_neighbor(entry).await?;
        debug!(host = %entry.host, address = %entry.address, mac = %entry.mac, "Neighbor set");
        self.record(JournalEntry::Neighbor(entry.clone()));
        Ok(ack)
    }

    pub async fn set_static_fdb(&mut self, entry: &StaticFdb) -> Result<Ack, ApplyError> {
        let ack = self.surface.set_static_fdb(entry).await?;
        debug!(host = %entry.host, mac = %entry.mac, dst = %entry.dst, "Fdb entry set");
        self.record(JournalEntry::Fdb(entry.clone()));
        Ok(ack)
    }

    /// Switches IP forwarding on `node`. Only enabling is journaled.
    pub async fn set_forwarding(&mut self, node: &str, enabled: bool) -> Result<Ack, ApplyError> {
        let ack = self.surface.set_forwarding(node, enabled).await?;
        info!(node = %node, enabled, "Forwarding set");
        let entry = JournalEntry::Forwarding {
            node: node.to_string(),
        };
        if enabled {
            self.record(entry);
        } else {
            self.forget(&entry);
        }
        Ok(ack)
    }

    /// Reads `switch`'s flow table back and diffs it against `expected`.
    #[instrument(skip(self, expected))]
    pub async fn verify<'a>(
        &mut self,
        switch: &str,
        expected: impl IntoIterator<Item = &'a FlowRule>,
    ) -> Result<Convergence, ApplyError> {
        let actual: BTreeSet<FlowRule> = self.surface.dump_flows(switch).await?.into_iter().collect();
        let expected: BTreeSet<FlowRule> = expected
            .into_iter()
            .filter(|r| r.switch == switch)
            .cloned()
            .collect();

        let convergence = Convergence {
            switch: switch.to_string(),
            missing: expected.difference(&actual).cloned().collect(),
            unexpected: actual.difference(&expected).cloned().collect(),
        };
        if convergence.is_converged() {
            info!(rules = expected.len(), "Flow table converged");
        } else {
            warn!(
                missing = convergence.missing.len(),
                unexpected = convergence.unexpected.len(),
                "Flow table diverges from plan"
            );
        }
        Ok(convergence)
    }

    /// Undoes the journal newest first. Failures are logged and skipped.
    ///
    /// Addresses, routes, neighbors and FDB entries vanish with their
    /// interface and are not undone separately. Forwarding is switched back
    /// off. Failed entries stay in the journal, so a later teardown
    /// retries exactly those.
    #[instrument(skip(self), fields(entries = self.journal.len()))]
    pub async fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let mut pending = std::mem::take(&mut self.journal);
        let mut kept = Vec::new();
        while let Some(entry) = pending.pop() {
            let result = match &entry {
                JournalEntry::Flow(rule) => self.surface.remove_flow(rule).await,
                JournalEntry::TunnelPort { switch, iface, .. } => {
                    self.surface.remove_tunnel_port(switch, iface).await
                }
                JournalEntry::VlanTag { host, iface, vlan } => {
                    self.surface.untag_vlan(host, iface, *vlan).await
                }
                JournalEntry::HostVtep { host, iface } => {
                    self.surface.remove_host_vtep(host, iface).await
                }
                JournalEntry::Forwarding { node } => self.surface.set_forwarding(node, false).await,
                JournalEntry::Address { .. }
                | JournalEntry::DefaultRoute { .. }
                | JournalEntry::Neighbor(_)
                | JournalEntry::Fdb(_) => {
                    report.skipped += 1;
                    continue;
                }
            };
            match result {
                Ok(_) => {
                    debug!(entry = %entry, "Undone");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(entry = %entry, error = %e, "Teardown step failed");
                    kept.push(entry.clone());
                    report.failed.push((entry, e));
                }
            }
        }
        kept.reverse();
        self.journal = kept;
        info!(
            removed = report.removed,
            failed = report.failed.len(),
            "Teardown finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_common::{BoundaryOp, FlowAction, FlowMatch, TunnelMode};
    use overlay_test::RecordingSurface;
    use overlay_types::Vni;

    fn port(p: u16) -> PortNo {
        PortNo::new(p).unwrap()
    }

    fn pair(phys: u16, vni: u32, tunnel: u16) -> BindingPair {
        let vni = Vni::new(vni).unwrap();
        BindingPair {
            outbound: FlowRule::new(
                "s1",
                FlowMatch::port(port(phys)),
                FlowAction::SetTunnelAndForward {
                    vni,
                    port: port(tunnel),
                },
            ),
            inbound: FlowRule::new(
                "s1",
                FlowMatch::tunnel(port(tunnel), vni),
                FlowAction::StripTunnelAndForward(port(phys)),
            ),
        }
    }

    #[tokio::test]
    async fn test_apply_pair_installs_inbound_first() {
        let surface = RecordingSurface::new();
        let mut driver = Driver::new(surface.clone());

        let binding = pair(1, 100, 9);
        driver.apply_pair(&binding).await.into_result().unwrap();

        let installs: Vec<_> = surface
            .calls_of(BoundaryOp::InstallFlow)
            .into_iter()
            .map(|c| c.detail)
            .collect();
        assert_eq!(
            installs,
            vec![binding.inbound.to_string(), binding.outbound.to_string()]
        );
        assert_eq!(driver.journal().len(), 2);
    }

    #[tokio::test]
    async fn test_apply_pair_partial_is_inconsistent() {
        let surface = RecordingSurface::new();
        surface.fail_on(BoundaryOp::InstallFlow, "tun_id=100");
        let mut driver = Driver::new(surface.clone());

        let binding = pair(1, 100, 9);
        let err = driver.apply_pair(&binding).await.into_result().unwrap_err();
        match err {
            OverlayError::InconsistentBindingState {
                applied, missing, ..
            } => {
                assert_eq!(applied, binding.outbound);
                assert_eq!(missing, binding.inbound);
            }
            other => panic!("Expected InconsistentBindingState, got {:?}", other),
        }
        assert_eq!(surface.flows("s1"), vec![binding.outbound.clone()]);
    }

    #[tokio::test]
    async fn test_apply_pair_both_failed() {
        let surface = RecordingSurface::new();
        surface.fail_on(BoundaryOp::InstallFlow, "");
        let mut driver = Driver::new(surface);

        let err = driver.apply_pair(&pair(1, 100, 9)).await.into_result().unwrap_err();
        assert!(matches!(err, OverlayError::Apply(_)));
        assert!(driver.journal().is_empty());
    }

    #[tokio::test]
    async fn test_remove_pair_restores_table() {
        let surface = RecordingSurface::new();
        let mut driver = Driver::new(surface.clone());
        let existing = FlowRule::new("s1", FlowMatch::port(port(3)), FlowAction::Forward(port(4)));
        driver.apply(&existing).await.unwrap();
        let before = surface.flows("s1");

        let binding = pair(1, 100, 9);
        driver.apply_pair(&binding).await.into_result().unwrap();
        driver.remove_pair(&binding).await.unwrap();

        assert_eq!(surface.flows("s1"), before);
        // Removing again is a no-op
        driver.remove_pair(&binding).await.unwrap();
        assert_eq!(driver.journal().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_reports_divergence() {
        let surface = RecordingSurface::new();
        let mut driver = Driver::new(surface.clone());
        let planned = pair(1, 100, 9);
        let stray = FlowRule::new("s1", FlowMatch::port(port(5)), FlowAction::Forward(port(6)));

        driver.apply(&planned.outbound).await.unwrap();
        driver.apply(&stray).await.unwrap();

        let convergence = driver.verify("s1", planned.rules()).await.unwrap();
        assert!(!convergence.is_converged());
        assert_eq!(convergence.missing, vec![planned.inbound.clone()]);
        assert_eq!(convergence.unexpected, vec![stray]);
    }

    #[tokio::test]
    async fn test_teardown_reverses_journal() {
        let surface = RecordingSurface::new();
        let mut driver = Driver::new(surface.clone());
        let endpoint = TunnelEndpoint {
            switch: "s1".to_string(),
            iface: "s1-vtep1".to_string(),
            port: port(9),
            remote: "192.168.253.131".parse().unwrap(),
            mode: TunnelMode::FlowBased,
        };
        driver
            .tag_vlan("h1", "h1-eth0", VlanId::new(100).unwrap())
            .await
            .unwrap();
        driver.create_tunnel(&endpoint).await.unwrap();
        driver
            .apply_pair(&pair(1, 100, 9))
            .await
            .into_result()
            .unwrap();

        let report = driver.teardown().await;
        assert!(report.is_clean());
        assert_eq!(report.removed, 4);
        assert!(surface.flows("s1").is_empty());
        assert!(surface.tunnel_ports("s1").is_empty());
        assert!(surface.vlan_tags().is_empty());

        let ops: Vec<_> = surface.calls().into_iter().map(|c| c.operation).collect();
        assert_eq!(
            &ops[ops.len() - 4..],
            &[
                BoundaryOp::RemoveFlow,
                BoundaryOp::RemoveFlow,
                BoundaryOp::RemoveSwitchPort,
                BoundaryOp::UntagVlan,
            ]
        );

        let again = driver.teardown().await;
        assert_eq!(again.removed, 0);
    }

    #[tokio::test]
    async fn test_teardown_failures_are_not_fatal() {
        let surface = RecordingSurface::new();
        let mut driver = Driver::new(surface.clone());
        let binding = pair(1, 100, 9);
        driver.apply_pair(&binding).await.into_result().unwrap();

        surface.fail_on(BoundaryOp::RemoveFlow, "set_tunnel");
        let report = driver.teardown().await;
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(
            driver.journal(),
            &[JournalEntry::Flow(binding.outbound.clone())]
        );

        // The failed entry is retried by the next teardown
        surface.clear_failures();
        let retry = driver.teardown().await;
        assert!(retry.is_clean());
        assert_eq!(retry.removed, 1);
        assert!(driver.journal().is_empty());
        assert_eq!(surface.flow_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_removes_host_vtep_and_disables_forwarding() {
        let surface = RecordingSurface::new();
        let mut driver = Driver::new(surface.clone());
        let mac = |s: &str| s.parse::<overlay_types::MacAddress>().unwrap();
        let spec = HostVtepSpec {
            host: "h1".to_string(),
            iface: "vtep1".to_string(),
            link: "h1-eth0".to_string(),
            vni: Vni::new(99).unwrap(),
            mac: mac("54:8:10:0:0:1"),
            address: "10.0.0.1/8".parse().unwrap(),
        };
        driver.set_forwarding("r0", true).await.unwrap();
        driver.create_host_vtep(&spec).await.unwrap();
        driver
            .set_static_neighbor(&StaticNeighbor {
                host: "h1".to_string(),
                iface: "vtep1".to_string(),
                address: "10.0.0.2".parse().unwrap(),
                mac: mac("54:8:10:0:0:2"),
            })
            .await
            .unwrap();
        driver
            .set_static_fdb(&StaticFdb {
                host: "h1".to_string(),
                iface: "vtep1".to_string(),
                mac: mac("54:8:10:0:0:2"),
                dst: "172.168.1.2".parse().unwrap(),
                vni: Vni::new(100).unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(driver.journal().len(), 4);
        assert_eq!(surface.forwarding("r0"), Some(true));

        let report = driver.teardown().await;
        assert!(report.is_clean());
        assert_eq!(report.removed, 2);
        assert_eq!(report.skipped, 2);
        assert!(surface.host_vteps("h1").is_empty());
        assert!(surface.neighbors("h1").is_empty());
        assert!(surface.fdb_entries("h1").is_empty());
        assert_eq!(surface.forwarding("r0"), Some(false));
        assert_eq!(
            surface.calls().last().map(|c| c.operation),
            Some(BoundaryOp::SetForwarding)
        );
    }

    #[tokio::test]
    async fn test_remove_host_vtep_forgets_its_entries() {
        let surface = RecordingSurface::new();
        let mut driver = Driver::new(surface.clone());
        let spec = HostVtepSpec {
            host: "h2".to_string(),
            iface: "vtep2".to_string(),
            link: "h2-eth0".to_string(),
            vni: Vni::new(100).unwrap(),
            mac: "54:8:10:0:0:2".parse().unwrap(),
            address: "10.0.0.2/8".parse().unwrap(),
        };
        driver.create_host_vtep(&spec).await.unwrap();
        driver
            .set_static_neighbor(&StaticNeighbor {
                host: "h2".to_string(),
                iface: "vtep2".to_string(),
                address: "10.0.0.1".parse().unwrap(),
                mac: "54:8:10:0:0:1".parse().unwrap(),
            })
            .await
            .unwrap();

        driver.remove_host_vtep("h2", "vtep2").await.unwrap();
        assert!(driver.journal().is_empty());
        assert!(surface.neighbors("h2").is_empty());
    }
}
