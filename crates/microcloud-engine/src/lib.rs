//! # Microcloud Engine
//!
//! Authoritative simulation of the virtual fleet.
//!
//! This crate provides:
//! - [`SimState`]: ground-truth nodes and services with a bounded
//!   random-walk tick
//! - [`Engine`]: the periodic tick loop publishing snapshots, plus command
//!   application publishing simulation events
//! - The simulation control HTTP surface
//!   (`/sim.v1.SimulationControl/*`)
//!
//! The engine is the single writer of simulated state; every external
//! mutation arrives as an [`ApplyActionCommand`](microcloud_core::types::ApplyActionCommand)
//! on `ops.commands`.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

mod engine;
pub mod server;
mod state;

pub use engine::{Engine, DEFAULT_TICK_INTERVAL};
pub use state::{Scenario, SimState};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::server::{control_router, ControlState};
    pub use crate::{Engine, Scenario, SimState, DEFAULT_TICK_INTERVAL};
}
