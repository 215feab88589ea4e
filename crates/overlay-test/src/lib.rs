//! Test infrastructure for the overlay planner
//!
//! Provides:
//! - An in-memory control surface that records every boundary call
//! - Per-operation failure injection
//! - Reference topology documents
//! - Flow table verification helpers

pub mod fixtures;
mod recording;
mod verification;

pub use fixtures::*;
pub use recording::{Call, RecordingSurface};
pub use verification::*;
