//! overlayd - VLAN/VXLAN overlay binding planner
//!
//! Computes overlay intent for an emulated network (which switch port maps
//! to which VNI, which remote each tunnel targets, which flow entries make
//! encapsulation and decapsulation symmetric) and pushes it through a
//! [`ControlSurface`](overlay_common::ControlSurface).
//!
//! Data flow: [`Topology`] → [`TunnelRegistry`] → [`FlowPlan`] →
//! [`Driver`] → control surface. Hosts that terminate VXLAN in the kernel
//! are planned by [`plan_host_vtep`]. [`Session`] runs the whole sequence.

pub mod blueprint;
pub mod commands;
pub mod config;
pub mod driver;
pub mod flow_plan;
pub mod host_vtep;
pub mod ovs;
pub mod session;
pub mod topology;
pub mod tunnel_registry;

pub use blueprint::Blueprint;
pub use commands::CommandBuilder;
pub use config::{OverlayConfig, Settings};
pub use driver::{Convergence, Driver, JournalEntry, PairOutcome, TeardownReport};
pub use flow_plan::{plan_binding, plan_patch, FlowPlan};
pub use host_vtep::{plan_host_vtep, HostVtepPlan};
pub use ovs::OvsSurface;
pub use session::Session;
pub use topology::{
    Host, HostRef, HostVtep, NodeRef, Router, RouterRef, Switch, SwitchRef, Topology, VlanBinding,
};
pub use tunnel_registry::{TunnelDefinition, TunnelEndpoint, TunnelRegistry};
