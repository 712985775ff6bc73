//! Domain model for the microcloud simulator.
//!
//! These types are the wire schema: they are published on the bus in binary
//! form, rendered as JSON on the HTTP surfaces, and mapped onto repository
//! rows. Enum discriminants are stable and must not be reordered.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Composite simulation timestamp attached to every domain event.
///
/// `tick_id` orders events in simulation time independently of the wall
/// clock; `sim_time_unix_ms` advances by `tick_interval * speed_multiplier`
/// per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationTimestamp {
    pub tick_id: i64,
    pub wall_time_unix_ms: i64,
    pub sim_time_unix_ms: i64,
}

/// Engine run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationState {
    Running,
    Paused,
    Stopped,
}

/// Node status derived from resource usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

/// Service health derived from error rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Critical,
    Down,
}

/// Incident severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentSeverity {
    Info,
    Warning,
    Critical,
    Fatal,
}

impl IncidentSeverity {
    /// Stable numeric code used by the repositories
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
            Self::Critical => 3,
            Self::Fatal => 4,
        }
    }

    /// Inverse of [`as_i32`](Self::as_i32)
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Info),
            2 => Some(Self::Warning),
            3 => Some(Self::Critical),
            4 => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// Remediation action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Unspecified,
    RestartService,
    ScaleUp,
    ScaleDown,
    DrainNode,
    RebalanceTraffic,
}

impl ActionType {
    /// Stable numeric code used by the repositories
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Unspecified => 0,
            Self::RestartService => 1,
            Self::ScaleUp => 2,
            Self::ScaleDown => 3,
            Self::DrainNode => 4,
            Self::RebalanceTraffic => 5,
        }
    }

    /// Inverse of [`as_i32`](Self::as_i32)
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unspecified),
            1 => Some(Self::RestartService),
            2 => Some(Self::ScaleUp),
            3 => Some(Self::ScaleDown),
            4 => Some(Self::DrainNode),
            5 => Some(Self::RebalanceTraffic),
            _ => None,
        }
    }
}

/// Action lifecycle status.
///
/// Legal transitions are `PENDING -> APPROVED -> EXECUTING -> {COMPLETED,
/// FAILED}` and `PENDING -> REJECTED`; both tails are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

impl ActionStatus {
    /// Stable numeric code used by the repositories
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Pending => 1,
            Self::Approved => 2,
            Self::Rejected => 3,
            Self::Executing => 4,
            Self::Completed => 5,
            Self::Failed => 6,
        }
    }

    /// Inverse of [`as_i32`](Self::as_i32)
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Pending),
            2 => Some(Self::Approved),
            3 => Some(Self::Rejected),
            4 => Some(Self::Executing),
            5 => Some(Self::Completed),
            6 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A virtual compute node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub status: NodeStatus,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub running_services: i32,
    pub availability_zone: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A virtual service scheduled on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub node_id: Uuid,
    pub health: ServiceHealth,
    pub requests_per_second: f64,
    pub error_rate_percent: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub replica_count: i32,
    pub desired_replicas: i32,
}

/// Fleet-wide traffic aggregates included in every snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub total_rps: f64,
    pub total_error_rate: f64,
    pub avg_latency_ms: f64,
    pub active_connections: i64,
}

/// Point-in-time dump of the whole simulated fleet, published on
/// `sim.metrics` every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: SimulationTimestamp,
    pub nodes: Vec<Node>,
    pub services: Vec<Service>,
    pub traffic: TrafficStats,
}

/// Outcome of a command applied to the simulation, published on `sim.events`.
///
/// `event_type` is empty when the command had no effect (unknown target or
/// action type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub timestamp: SimulationTimestamp,
    pub event_type: String,
    pub target_id: String,
    pub description: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Detected anomaly, published on `ops.incidents`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub detected_at: SimulationTimestamp,
    pub severity: IncidentSeverity,
    pub title: String,
    pub description: String,
    pub source_service: String,
    pub affected_ids: Vec<Uuid>,
    pub rule_name: String,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    pub resolved: bool,
    pub resolved_at: Option<SimulationTimestamp>,
}

/// Proposed remediation, published on `ops.actions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub proposed_at_tick: i64,
    pub action_type: ActionType,
    pub target_id: Uuid,
    pub status: ActionStatus,
    pub reason: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub created_at: SimulationTimestamp,
    pub executed_at: Option<SimulationTimestamp>,
    pub result_message: String,
}

/// Approved instruction from the orchestrator to the engine, published on
/// `ops.commands`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyActionCommand {
    pub action_id: Uuid,
    pub target_tick_id: i64,
    pub action_type: ActionType,
    pub target_id: Uuid,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}
