//! Common infrastructure for the VLAN/VXLAN overlay planner.
//!
//! This crate holds what every other overlay crate shares:
//!
//! - [`error`]: the error taxonomy ([`OverlayError`], [`ApplyError`])
//! - [`shell`]: shell command execution with proper quoting
//! - [`rule`]: forwarding rules in Open vSwitch flow syntax
//! - [`surface`]: the [`ControlSurface`] boundary the planner pushes intent through
//!
//! # Architecture
//!
//! The planner never touches a switch directly. It compiles [`FlowRule`]s and
//! tunnel port specs, then hands them to a [`ControlSurface`]:
//!
//! 1. Build the topology and assign tunnel ports (pure, in memory)
//! 2. Compile encapsulate/decapsulate rule pairs (pure)
//! 3. Push ports and rules through the surface (side effects)
//! 4. Read the flow tables back to verify convergence
//!
//! # Example
//!
//! ```ignore
//! use overlay_common::shell::{self, OVS_OFCTL_CMD, shellquote};
//!
//! async fn install(switch: &str, flow: &str) -> overlay_common::ShellResult<String> {
//!     let cmd = format!("{} add-flow {} {}", OVS_OFCTL_CMD, shellquote(switch), shellquote(flow));
//!     shell::exec_or_throw(&cmd).await
//! }
//! ```

pub mod error;
pub mod rule;
pub mod shell;
pub mod surface;

// Re-export commonly used items at crate root
pub use error::{ApplyError, EntityKind, OverlayError, OverlayResult, ShellError, ShellResult};
pub use rule::{BindingPair, FlowAction, FlowMatch, FlowRule, PatchPair};
pub use surface::{
    Ack, BoundaryOp, ControlSurface, HostVtepSpec, StaticFdb, StaticNeighbor, TunnelMode,
    TunnelPortSpec,
};
