//! Open vSwitch control surface.
//!
//! Renders each boundary operation into an `ovs-vsctl`, `ovs-ofctl` or `ip`
//! command and runs it through the shell, bounded by the configured
//! timeout. In dry-run mode commands are only recorded.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use overlay_common::shell;
use overlay_common::{
    Ack, ApplyError, BoundaryOp, ControlSurface, FlowAction, FlowMatch, FlowRule, HostVtepSpec,
    ShellError, StaticFdb, StaticNeighbor, TunnelPortSpec,
};
use overlay_types::{IpPrefix, PortNo, Vni, VlanId};

use crate::commands::CommandBuilder;
use crate::config::Settings;

/// One `dump-flows` entry: match fields, then the action list.
static FLOW_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<fields>.*?)\s*actions=(?P<actions>\S+)\s*$").expect("Invalid regex pattern")
});

/// Fields `dump-flows` may print that are not part of the match.
const NON_MATCH_FIELDS: &[&str] = &[
    "cookie",
    "duration",
    "table",
    "n_packets",
    "n_bytes",
    "idle_age",
    "hard_age",
    "reset_counts",
];

/// Default OpenFlow priority; `ovs-ofctl` omits it but some versions print it.
const DEFAULT_PRIORITY: &str = "32768";

/// Control surface backed by Open vSwitch and iproute2.
pub struct OvsSurface {
    commands: CommandBuilder,
    timeout: Duration,
    dry_run: bool,
    rendered: Vec<String>,
}

impl OvsSurface {
    pub fn new(settings: &Settings) -> Self {
        Self {
            commands: CommandBuilder::from(settings),
            timeout: Duration::from_millis(settings.apply_timeout_ms),
            dry_run: false,
            rendered: Vec::new(),
        }
    }

    /// Records commands instead of running them.
    pub fn with_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Every command issued so far, in order.
    pub fn rendered(&self) -> &[String] {
        &self.rendered
    }

    async fn run(&mut self, operation: BoundaryOp, cmd: String) -> Result<Ack, ApplyError> {
        if self.dry_run {
            info!("Dry run: {}", cmd);
            self.rendered.push(cmd);
            return Ok(Ack::new(operation, "dry-run"));
        }

        self.rendered.push(cmd.clone());
        match tokio::time::timeout(self.timeout, shell::exec_or_throw(&cmd)).await {
            Ok(Ok(output)) => Ok(Ack::new(operation, output)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(operation = %operation, command = %cmd, "Command timed out");
                Err(ApplyError::Timeout {
                    operation,
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Turns a non-zero exit into the operation's own error kind. Timeouts and
/// spawn failures pass through unchanged.
fn rejected(err: ApplyError, kind: impl FnOnce(String) -> ApplyError) -> ApplyError {
    match err {
        ApplyError::Shell(ShellError::ShellCommandFailed { output, .. }) => kind(output),
        other => other,
    }
}

/// Parses `ovs-ofctl --no-stats --no-names dump-flows` output.
///
/// Entries whose match or actions fall outside [`FlowRule`]'s vocabulary
/// are skipped with a warning.
pub fn parse_dump_flows(switch: &str, output: &str) -> Vec<FlowRule> {
    output
        .lines()
        .filter(|line| line.contains("actions="))
        .filter_map(|line| {
            let rule = parse_flow_line(switch, line);
            if rule.is_none() {
                warn!(switch = %switch, line = %line.trim(), "Skipping unrecognised flow");
            }
            rule
        })
        .collect()
}

fn parse_flow_line(switch: &str, line: &str) -> Option<FlowRule> {
    let caps = FLOW_LINE_RE.captures(line)?;

    let mut in_port = None;
    let mut tun_id = None;
    for token in caps["fields"]
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let (key, value) = token.split_once('=').unwrap_or((token, ""));
        match key {
            "in_port" => in_port = Some(value.parse::<PortNo>().ok()?),
            "tun_id" => tun_id = Some(value.parse::<Vni>().ok()?),
            "priority" if value == DEFAULT_PRIORITY => {}
            k if NON_MATCH_FIELDS.contains(&k) => {}
            _ => return None,
        }
    }

    let mut set_tunnel = None;
    let mut output = None;
    for action in caps["actions"].split(',') {
        if let Some(v) = action
            .strip_prefix("set_tunnel:")
            .or_else(|| action.strip_prefix("set_tunnel64:"))
        {
            set_tunnel = Some(v.parse::<Vni>().ok()?);
        } else if let Some(p) = action.strip_prefix("output:") {
            if output.is_some() {
                return None;
            }
            output = Some(p.parse::<PortNo>().ok()?);
        } else {
            return None;
        }
    }

    let flow_match = FlowMatch {
        in_port: in_port?,
        tun_id,
    };
    let port = output?;
    let action = match (set_tunnel, tun_id) {
        (Some(vni), _) => FlowAction::SetTunnelAndForward { vni, port },
        (None, Some(_)) => FlowAction::StripTunnelAndForward(port),
        (None, None) => FlowAction::Forward(port),
    };
    Some(FlowRule::new(switch, flow_match, action))
}

#[async_trait]
impl ControlSurface for OvsSurface {
    fn name(&self) -> &str {
        if self.dry_run {
            "ovs-dry-run"
        } else {
            "ovs"
        }
    }

    async fn create_tunnel_port(&mut self, spec: &TunnelPortSpec) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_add_tunnel_port_cmd(spec);
        self.run(BoundaryOp::CreateSwitchPort, cmd)
            .await
            .map_err(|e| {
                rejected(e, |reason| ApplyError::PortCreateFailed {
                    switch: spec.switch.clone(),
                    iface: spec.iface.clone(),
                    reason,
                })
            })
    }

    async fn remove_tunnel_port(&mut self, switch: &str, iface: &str) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_del_tunnel_port_cmd(switch, iface);
        self.run(BoundaryOp::RemoveSwitchPort, cmd)
            .await
            .map_err(|e| {
                rejected(e, |reason| ApplyError::TeardownFailed {
                    entity: format!("{}:{}", switch, iface),
                    reason,
                })
            })
    }

    async fn install_flow(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_add_flow_cmd(rule);
        self.run(BoundaryOp::InstallFlow, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::FlowInstallFailed {
                switch: rule.switch.clone(),
                rule: rule.flow_spec(),
                reason,
            })
        })
    }

    async fn remove_flow(&mut self, rule: &FlowRule) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_del_flow_cmd(rule);
        self.run(BoundaryOp::RemoveFlow, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::TeardownFailed {
                entity: rule.to_string(),
                reason,
            })
        })
    }

    async fn dump_flows(&mut self, switch: &str) -> Result<Vec<FlowRule>, ApplyError> {
        let cmd = self.commands.build_dump_flows_cmd(switch);
        let ack = self.run(BoundaryOp::DumpFlows, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::DumpFailed {
                switch: switch.to_string(),
                reason,
            })
        })?;
        if self.dry_run {
            return Ok(Vec::new());
        }
        let rules = parse_dump_flows(switch, &ack.detail);
        debug!(switch = %switch, rules = rules.len(), "Flow table read");
        Ok(rules)
    }

    async fn tag_vlan(&mut self, host: &str, iface: &str, vlan: VlanId) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_tag_vlan_cmd(host, iface, vlan);
        self.run(BoundaryOp::TagVlan, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::VlanTagFailed {
                host: host.to_string(),
                iface: iface.to_string(),
                vlan,
                reason,
            })
        })
    }

    async fn untag_vlan(
        &mut self,
        host: &str,
        iface: &str,
        vlan: VlanId,
    ) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_untag_vlan_cmd(host, iface, vlan);
        self.run(BoundaryOp::UntagVlan, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::TeardownFailed {
                entity: format!("{}:{}", host, vlan.sub_interface(iface)),
                reason,
            })
        })
    }

    async fn set_interface_address(
        &mut self,
        host: &str,
        iface: &str,
        address: &IpPrefix,
    ) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_set_address_cmd(host, iface, address);
        self.run(BoundaryOp::SetInterfaceAddress, cmd)
            .await
            .map_err(|e| {
                rejected(e, |reason| ApplyError::AddressSetFailed {
                    host: host.to_string(),
                    iface: iface.to_string(),
                    reason,
                })
            })
    }

    async fn set_default_route(&mut self, host: &str, gateway: IpAddr) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_default_route_cmd(host, gateway);
        self.run(BoundaryOp::SetDefaultRoute, cmd)
            .await
            .map_err(|e| {
                rejected(e, |reason| ApplyError::RouteSetFailed {
                    host: host.to_string(),
                    reason,
                })
            })
    }

    async fn create_host_vtep(&mut self, spec: &HostVtepSpec) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_add_host_vtep_cmd(spec);
        self.run(BoundaryOp::CreateHostVtep, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::HostVtepFailed {
                host: spec.host.clone(),
                iface: spec.iface.clone(),
                reason,
            })
        })
    }

    async fn remove_host_vtep(&mut self, host: &str, iface: &str) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_del_host_vtep_cmd(host, iface);
        self.run(BoundaryOp::RemoveHostVtep, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::TeardownFailed {
                entity: format!("{}:{}", host, iface),
                reason,
            })
        })
    }

    async fn set_static_neighbor(&mut self, entry: &StaticNeighbor) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_static_neighbor_cmd(entry);
        self.run(BoundaryOp::SetStaticNeighbor, cmd)
            .await
            .map_err(|e| {
                rejected(e, |reason| ApplyError::NeighborSetFailed {
                    host: entry.host.clone(),
                    iface: entry.iface.clone(),
                    reason,
                })
            })
    }

    async fn set_static_fdb(&mut self, entry: &StaticFdb) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_static_fdb_cmd(entry);
        self.run(BoundaryOp::SetStaticFdb, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::FdbSetFailed {
                host: entry.host.clone(),
                iface: entry.iface.clone(),
                reason,
            })
        })
    }

    async fn set_forwarding(&mut self, node: &str, enabled: bool) -> Result<Ack, ApplyError> {
        let cmd = self.commands.build_set_forwarding_cmd(node, enabled);
        self.run(BoundaryOp::SetForwarding, cmd).await.map_err(|e| {
            rejected(e, |reason| ApplyError::ForwardingSetFailed {
                node: node.to_string(),
                reason,
            })
        })
    }
}
