//! Error types for overlay planning and application.
//!
//! Two layers, matching how failures propagate:
//!
//! - [`OverlayError`]: everything the planner can report to its caller.
//!   Construction errors leave the model usable; boundary errors abort the
//!   setup sequence.
//! - [`ApplyError`]: a control-surface operation was rejected or timed out.
//!   It carries whatever the surface reported, uninterpreted.

use std::fmt;
use std::io;
use thiserror::Error;

use overlay_types::{ParseError, PortNo, Vni, VlanId};

use crate::rule::FlowRule;
use crate::surface::BoundaryOp;

/// Result type alias for overlay operations.
pub type OverlayResult<T> = Result<T, OverlayError>;

/// Result type alias for shell execution.
pub type ShellResult<T> = Result<T, ShellError>;

/// Kind of topology entity, used in lookup and duplicate errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Host,
    Switch,
    Router,
    Tunnel,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Host => write!(f, "host"),
            EntityKind::Switch => write!(f, "switch"),
            EntityKind::Router => write!(f, "router"),
            EntityKind::Tunnel => write!(f, "tunnel"),
        }
    }
}

/// Errors from running a shell command.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        command: String,
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },
}

/// A boundary operation was rejected by the control surface.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Failed to create tunnel port {iface} on {switch}: {reason}")]
    PortCreateFailed {
        switch: String,
        iface: String,
        reason: String,
    },

    #[error("Failed to install flow on {switch} ({rule}): {reason}")]
    FlowInstallFailed {
        switch: String,
        rule: String,
        reason: String,
    },

    #[error("Failed to set address on {host}:{iface}: {reason}")]
    AddressSetFailed {
        host: String,
        iface: String,
        reason: String,
    },

    #[error("Failed to tag {host}:{iface} with VLAN {vlan}: {reason}")]
    VlanTagFailed {
        host: String,
        iface: String,
        vlan: VlanId,
        reason: String,
    },

    #[error("Failed to set default route on {host}: {reason}")]
    RouteSetFailed { host: String, reason: String },

    #[error("Failed to create VTEP {iface} on {host}: {reason}")]
    HostVtepFailed {
        host: String,
        iface: String,
        reason: String,
    },

    #[error("Failed to set static neighbor on {host}:{iface}: {reason}")]
    NeighborSetFailed {
        host: String,
        iface: String,
        reason: String,
    },

    #[error("Failed to set static FDB entry on {host}:{iface}: {reason}")]
    FdbSetFailed {
        host: String,
        iface: String,
        reason: String,
    },

    #[error("Failed to set forwarding on {node}: {reason}")]
    ForwardingSetFailed { node: String, reason: String },

    #[error("Failed to read flow table of {switch}: {reason}")]
    DumpFailed { switch: String, reason: String },

    #[error("Failed to tear down {entity}: {reason}")]
    TeardownFailed { entity: String, reason: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: BoundaryOp, after_ms: u64 },

    #[error(transparent)]
    Shell(#[from] ShellError),
}

impl ApplyError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApplyError::Timeout { .. })
    }
}

/// Errors that can occur while building, planning or applying an overlay.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("{kind} '{name}' already exists")]
    DuplicateEntity { kind: EntityKind, name: String },

    #[error("{kind} '{name}' not found")]
    UnknownEntity { kind: EntityKind, name: String },

    #[error("Host '{host}' is already linked")]
    HostAlreadyLinked { host: String },

    #[error("Switch '{switch}' already carries tunnels; its physical ports are frozen")]
    PortSpaceFrozen { switch: String },

    #[error("Switch '{switch}' has no physical port {port}")]
    NotPhysicalPort { switch: String, port: PortNo },

    #[error("Switch '{switch}' has no tunnel port {port}")]
    UnknownTunnelPort { switch: String, port: PortNo },

    #[error("Tunnel port {port} on {switch} is bound to VNI {bound}, not {requested}")]
    VniMismatch {
        switch: String,
        port: PortNo,
        bound: Vni,
        requested: Vni,
    },

    #[error("VNI {vni} on {switch} is already bound to tunnel port {port}")]
    VniAlreadyBound {
        switch: String,
        vni: Vni,
        port: PortNo,
    },

    #[error("Switch '{switch}' ran out of port numbers")]
    PortsExhausted { switch: String },

    #[error("Rule '{conflicting}' conflicts with installed rule '{existing}'")]
    MatchConflict {
        existing: FlowRule,
        conflicting: FlowRule,
    },

    /// One half of an encapsulate/decapsulate pair is on the switch, the
    /// other is not. The caller decides whether to retry or unwind.
    #[error("Inconsistent binding: '{applied}' applied but '{missing}' failed: {source}")]
    InconsistentBindingState {
        applied: FlowRule,
        missing: FlowRule,
        #[source]
        source: ApplyError,
    },

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Topology is closed")]
    Closed,
}

impl OverlayError {
    /// Creates a duplicate entity error.
    pub fn duplicate(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::DuplicateEntity {
            kind,
            name: name.into(),
        }
    }

    /// Creates an unknown entity error.
    pub fn unknown(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::UnknownEntity {
            kind,
            name: name.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors raised while declaring topology, tunnels or
    /// bindings. These abort only the offending call.
    pub fn is_construction_error(&self) -> bool {
        !matches!(
            self,
            OverlayError::Apply(_) | OverlayError::InconsistentBindingState { .. }
        )
    }
}
