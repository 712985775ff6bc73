//! # Microcloud Core
//!
//! Shared foundation for the microcloud simulator services.
//!
//! This crate provides:
//! - Domain types exchanged on the bus and stored in repositories
//! - The crate-wide error type and `Result` alias
//! - Environment-driven configuration
//! - Logging bootstrap

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BusConfig, DbConfig, LogConfig, LogFormat};
    pub use crate::types::{
        Action, ActionStatus, ActionType, ApplyActionCommand, Incident, IncidentSeverity,
        MetricSnapshot, Node, NodeStatus, Service, ServiceHealth, SimulationEvent,
        SimulationState, SimulationTimestamp, TrafficStats,
    };
    pub use crate::{Error, Result};
}
