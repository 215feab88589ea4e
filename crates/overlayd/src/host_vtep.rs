//! Host VTEP planner.
//!
//! A host VTEP runs with learning off, so each peer it should reach is spelled
//! out: a permanent neighbor for the peer's overlay address, and an FDB entry
//! sending the peer's MAC to the peer host's underlay address under the
//! peer's VNI.

use tracing::debug;

use overlay_common::{HostVtepSpec, OverlayError, OverlayResult, StaticFdb, StaticNeighbor};

use crate::topology::{Host, Topology};

/// Everything one host VTEP needs on its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVtepPlan {
    pub spec: HostVtepSpec,
    pub neighbors: Vec<StaticNeighbor>,
    pub fdb: Vec<StaticFdb>,
}

/// Plans the device on `host` and its static entries towards `peers`.
///
/// Without an explicit peer list every other VTEP host is a peer, in
/// declaration order.
pub fn plan_host_vtep(
    topology: &Topology,
    host: &str,
    peers: Option<&[String]>,
) -> OverlayResult<HostVtepPlan> {
    let local = topology.host(host)?;
    let vtep = local.vtep.as_ref().ok_or_else(|| {
        OverlayError::invalid_config("vtep", format!("host '{}' has no vtep", host))
    })?;
    let link = local.effective_iface().ok_or_else(|| {
        OverlayError::invalid_config("vtep", format!("host '{}' is not linked", host))
    })?;

    let peers: Vec<&Host> = match peers {
        Some(names) => {
            let mut seen = Vec::with_capacity(names.len());
            for name in names {
                if seen.iter().any(|h: &&Host| h.name == *name) {
                    return Err(OverlayError::invalid_config(
                        "vtep.peers",
                        format!("peer '{}' listed twice on host '{}'", name, host),
                    ));
                }
                seen.push(topology.host(name)?);
            }
            seen
        }
        None => topology
            .host_vteps()
            .map(|(peer, _)| peer)
            .filter(|peer| peer.name != host)
            .collect(),
    };

    let mut plan = HostVtepPlan {
        spec: HostVtepSpec {
            host: host.to_string(),
            iface: vtep.iface.clone(),
            link,
            vni: vtep.vni,
            mac: vtep.mac,
            address: vtep.address,
        },
        neighbors: Vec::with_capacity(peers.len()),
        fdb: Vec::with_capacity(peers.len()),
    };

    for peer in peers {
        if peer.name == host {
            return Err(OverlayError::invalid_config(
                "vtep.peers",
                format!("host '{}' cannot peer with itself", host),
            ));
        }
        let remote = peer.vtep.as_ref().ok_or_else(|| {
            OverlayError::invalid_config(
                "vtep.peers",
                format!("peer '{}' of host '{}' has no vtep", peer.name, host),
            )
        })?;
        let underlay = peer.address.ok_or_else(|| {
            OverlayError::invalid_config(
                "vtep.peers",
                format!("peer '{}' has no underlay address", peer.name),
            )
        })?;

        plan.neighbors.push(StaticNeighbor {
            host: host.to_string(),
            iface: vtep.iface.clone(),
            address: remote.address.address(),
            mac: remote.mac,
        });
        plan.fdb.push(StaticFdb {
            host: host.to_string(),
            iface: vtep.iface.clone(),
            mac: remote.mac,
            dst: underlay.address(),
            vni: remote.vni,
        });
    }

    debug!(
        host = %host,
        iface = %plan.spec.iface,
        peers = plan.fdb.len(),
        "Host vtep planned"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_types::{MacAddress, Vni};
    use pretty_assertions::assert_eq;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    /// h1 and h2 on different segments, each with a vtep; h3 has none.
    fn two_segments() -> Topology {
        let mut topo = Topology::open("test");
        let s1 = topo.add_switch("s1").unwrap();
        let s2 = topo.add_switch("s2").unwrap();
        let h1 = topo
            .add_host("h1", None, Some("192.168.1.2/24".parse().unwrap()))
            .unwrap();
        let h2 = topo
            .add_host("h2", None, Some("172.168.1.2/24".parse().unwrap()))
            .unwrap();
        let h3 = topo.add_host("h3", None, None).unwrap();
        topo.add_link(h1, s1).unwrap();
        topo.add_link(h2, s2).unwrap();
        topo.add_link(h3, s2).unwrap();
        topo.add_host_vtep(
            h1,
            Vni::new(99).unwrap(),
            mac("54:8:10:0:0:1"),
            "10.0.0.1/8".parse().unwrap(),
        )
        .unwrap();
        topo.add_host_vtep(
            h2,
            Vni::new(100).unwrap(),
            mac("54:8:10:0:0:2"),
            "10.0.0.2/8".parse().unwrap(),
        )
        .unwrap();
        topo
    }

    #[test]
    fn test_peer_entries_point_at_peer_underlay() {
        let topo = two_segments();
        let plan = plan_host_vtep(&topo, "h1", None).unwrap();

        assert_eq!(plan.spec.iface, "vtep1");
        assert_eq!(plan.spec.link, "h1-eth0");
        assert_eq!(plan.spec.vni, Vni::new(99).unwrap());
        assert_eq!(
            plan.neighbors,
            vec![StaticNeighbor {
                host: "h1".to_string(),
                iface: "vtep1".to_string(),
                address: "10.0.0.2".parse().unwrap(),
                mac: mac("54:8:10:0:0:2"),
            }]
        );
        assert_eq!(
            plan.fdb,
            vec![StaticFdb {
                host: "h1".to_string(),
                iface: "vtep1".to_string(),
                mac: mac("54:8:10:0:0:2"),
                dst: "172.168.1.2".parse().unwrap(),
                vni: Vni::new(100).unwrap(),
            }]
        );
    }

    #[test]
    fn test_explicit_peers() {
        let topo = two_segments();
        let none: Vec<String> = Vec::new();
        let plan = plan_host_vtep(&topo, "h2", Some(none.as_slice())).unwrap();
        assert!(plan.neighbors.is_empty());
        assert!(plan.fdb.is_empty());

        let listed = vec!["h1".to_string()];
        let plan = plan_host_vtep(&topo, "h2", Some(listed.as_slice())).unwrap();
        assert_eq!(plan.fdb[0].dst.to_string(), "192.168.1.2");
    }

    #[test]
    fn test_bad_peers_rejected() {
        let topo = two_segments();
        for peers in [
            vec!["h1".to_string()],
            vec!["h3".to_string()],
            vec!["h2".to_string(), "h2".to_string()],
        ] {
            let result = plan_host_vtep(&topo, "h1", Some(peers.as_slice()));
            assert!(
                matches!(result, Err(OverlayError::InvalidConfig { .. })),
                "{:?}",
                peers
            );
        }
        assert!(matches!(
            plan_host_vtep(&topo, "h1", Some(&["h9".to_string()][..])),
            Err(OverlayError::UnknownEntity { .. })
        ));
        assert!(matches!(
            plan_host_vtep(&topo, "h3", None),
            Err(OverlayError::InvalidConfig { .. })
        ));
    }
}
