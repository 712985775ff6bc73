//! # Microcloud Storage
//!
//! Persistence layer for the microcloud simulator.
//!
//! This crate provides:
//! - Repository traits for the three collections (metrics, incidents, actions)
//! - A Postgres adapter (`sqlx`) with schema migrations
//! - An in-memory adapter for tests and embedded runs
//!
//! The core services depend only on the traits; the binary picks an adapter.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use microcloud_core::types::{
    Action, ActionStatus, ActionType, Incident, IncidentSeverity, SimulationTimestamp,
};
use microcloud_core::Result;
use std::collections::HashMap;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// A single metric data point. Exactly one of `node_id` / `service_id` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub time: DateTime<Utc>,
    pub tick_id: i64,
    pub node_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub metric_name: String,
    pub metric_value: f64,
    pub labels: HashMap<String, String>,
}

/// An incident as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRow {
    pub id: Uuid,
    pub detected_at: DateTime<Utc>,
    pub tick_id: i64,
    pub severity: IncidentSeverity,
    pub title: String,
    pub description: String,
    pub source_service: String,
    pub affected_ids: Vec<Uuid>,
    pub rule_name: String,
    pub metrics: HashMap<String, f64>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<&Incident> for IncidentRow {
    fn from(incident: &Incident) -> Self {
        Self {
            id: incident.id,
            detected_at: DateTime::from_timestamp_millis(incident.detected_at.wall_time_unix_ms)
                .unwrap_or_else(Utc::now),
            tick_id: incident.detected_at.tick_id,
            severity: incident.severity,
            title: incident.title.clone(),
            description: incident.description.clone(),
            source_service: incident.source_service.clone(),
            affected_ids: incident.affected_ids.clone(),
            rule_name: incident.rule_name.clone(),
            metrics: incident.metrics.clone(),
            resolved: incident.resolved,
            resolved_at: None,
        }
    }
}

/// An action as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRow {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub proposed_at_tick: i64,
    pub action_type: ActionType,
    pub target_id: Uuid,
    pub status: ActionStatus,
    pub reason: String,
    pub parameters: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub result_message: String,
}

impl From<&Action> for ActionRow {
    fn from(action: &Action) -> Self {
        Self {
            id: action.id,
            incident_id: action.incident_id,
            proposed_at_tick: action.proposed_at_tick,
            action_type: action.action_type,
            target_id: action.target_id,
            status: action.status,
            reason: action.reason.clone(),
            parameters: action.parameters.clone(),
            created_at: DateTime::from_timestamp_millis(action.created_at.wall_time_unix_ms)
                .unwrap_or_else(Utc::now),
            executed_at: None,
            result_message: action.result_message.clone(),
        }
    }
}

impl ActionRow {
    /// Rehydrate the wire-level action from a row
    pub fn to_action(&self) -> Action {
        Action {
            id: self.id,
            incident_id: self.incident_id,
            proposed_at_tick: self.proposed_at_tick,
            action_type: self.action_type,
            target_id: self.target_id,
            status: self.status,
            reason: self.reason.clone(),
            parameters: self.parameters.clone(),
            created_at: SimulationTimestamp {
                tick_id: 0,
                wall_time_unix_ms: self.created_at.timestamp_millis(),
                sim_time_unix_ms: 0,
            },
            executed_at: self.executed_at.map(|at| SimulationTimestamp {
                tick_id: 0,
                wall_time_unix_ms: at.timestamp_millis(),
                sim_time_unix_ms: 0,
            }),
            result_message: self.result_message.clone(),
        }
    }
}

/// A time-bucketed metric aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedMetric {
    pub bucket: DateTime<Utc>,
    pub avg_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub sample_count: i64,
}

/// Append-heavy, time-indexed metric storage
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Insert a batch of metric rows
    async fn insert_batch(&self, rows: &[MetricRow]) -> Result<()>;

    /// Metrics for one name within a time range, newest first
    async fn query_range(
        &self,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MetricRow>>;

    /// Latest metrics for a node, newest first
    async fn latest_for_node(&self, node_id: Uuid, limit: i64) -> Result<Vec<MetricRow>>;

    /// Latest metrics for a service, newest first
    async fn latest_for_service(&self, service_id: Uuid, limit: i64) -> Result<Vec<MetricRow>>;

    /// Bucketed aggregates for one metric within a time range, newest
    /// bucket first
    async fn aggregate(
        &self,
        metric_name: &str,
        bucket: chrono::Duration,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AggregatedMetric>>;
}

/// Incident storage, addressable by id, resolution state and severity
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Insert a new incident
    async fn create(&self, row: &IncidentRow) -> Result<()>;

    /// Fetch one incident
    async fn get(&self, id: Uuid) -> Result<Option<IncidentRow>>;

    /// Unresolved incidents, most severe and newest first
    async fn list_unresolved(&self, limit: i64) -> Result<Vec<IncidentRow>>;

    /// Recent incidents, newest first
    async fn list_recent(&self, limit: i64) -> Result<Vec<IncidentRow>>;

    /// Incidents at or above a severity, most severe and newest first
    async fn list_by_severity(
        &self,
        min_severity: IncidentSeverity,
        limit: i64,
    ) -> Result<Vec<IncidentRow>>;

    /// Mark an incident resolved
    async fn mark_resolved(&self, id: Uuid, resolved_at: DateTime<Utc>) -> Result<()>;

    /// Number of unresolved incidents
    async fn count_unresolved(&self) -> Result<i64>;
}

/// Action storage, addressable by id, status and incident
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert a new action
    async fn create(&self, row: &ActionRow) -> Result<()>;

    /// Fetch one action
    async fn get(&self, id: Uuid) -> Result<Option<ActionRow>>;

    /// Pending actions, oldest first
    async fn list_pending(&self, limit: i64) -> Result<Vec<ActionRow>>;

    /// Actions in a given status, newest first
    async fn list_by_status(&self, status: ActionStatus, limit: i64) -> Result<Vec<ActionRow>>;

    /// All actions proposed for an incident, oldest first
    async fn list_by_incident(&self, incident_id: Uuid) -> Result<Vec<ActionRow>>;

    /// Recent actions, newest first
    async fn list_recent(&self, limit: i64) -> Result<Vec<ActionRow>>;

    /// Transition an action's status and record the outcome message
    async fn update_status(
        &self,
        id: Uuid,
        status: ActionStatus,
        result_message: &str,
    ) -> Result<()>;
}

/// Re-export commonly used items
pub mod prelude {
    pub use crate::{
        ActionRow, ActionStore, AggregatedMetric, IncidentRow, IncidentStore, MemoryStore,
        MetricRow, MetricStore, PostgresStore,
    };
}
