//! In-memory adapter.
//!
//! Implements the three repository traits over plain maps with the same
//! ordering semantics as the SQL queries. Used by tests and embedded runs.

use crate::{
    ActionRow, ActionStore, AggregatedMetric, IncidentRow, IncidentStore, MetricRow, MetricStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use microcloud_core::types::{ActionStatus, IncidentSeverity};
use microcloud_core::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// Process-local implementation of all three repositories
#[derive(Debug, Default)]
pub struct MemoryStore {
    metrics: Mutex<Vec<MetricRow>>,
    incidents: Mutex<HashMap<Uuid, IncidentRow>>,
    actions: Mutex<HashMap<Uuid, ActionRow>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of metric rows currently held
    pub fn metric_count(&self) -> usize {
        self.metrics.lock().len()
    }
}

fn truncate<T>(mut rows: Vec<T>, limit: i64) -> Vec<T> {
    if limit >= 0 {
        rows.truncate(limit as usize);
    }
    rows
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn insert_batch(&self, rows: &[MetricRow]) -> Result<()> {
        self.metrics.lock().extend_from_slice(rows);
        Ok(())
    }

    async fn query_range(
        &self,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MetricRow>> {
        let mut rows: Vec<_> = self
            .metrics
            .lock()
            .iter()
            .filter(|m| m.metric_name == metric_name && m.time >= start && m.time < end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(truncate(rows, limit))
    }

    async fn latest_for_node(&self, node_id: Uuid, limit: i64) -> Result<Vec<MetricRow>> {
        let mut rows: Vec<_> = self
            .metrics
            .lock()
            .iter()
            .filter(|m| m.node_id == Some(node_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(truncate(rows, limit))
    }

    async fn latest_for_service(&self, service_id: Uuid, limit: i64) -> Result<Vec<MetricRow>> {
        let mut rows: Vec<_> = self
            .metrics
            .lock()
            .iter()
            .filter(|m| m.service_id == Some(service_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(truncate(rows, limit))
    }

    async fn aggregate(
        &self,
        metric_name: &str,
        bucket: chrono::Duration,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AggregatedMetric>> {
        let bucket_ms = bucket.num_milliseconds().max(1);
        let mut buckets: std::collections::BTreeMap<i64, Vec<f64>> = std::collections::BTreeMap::new();

        for row in self.metrics.lock().iter() {
            if row.metric_name != metric_name || row.time < start || row.time >= end {
                continue;
            }
            let ms = row.time.timestamp_millis();
            buckets
                .entry(ms - ms.rem_euclid(bucket_ms))
                .or_default()
                .push(row.metric_value);
        }

        Ok(buckets
            .into_iter()
            .rev()
            .map(|(bucket_ms, values)| AggregatedMetric {
                bucket: DateTime::from_timestamp_millis(bucket_ms).unwrap_or_else(Utc::now),
                avg_value: values.iter().sum::<f64>() / values.len() as f64,
                min_value: values.iter().cloned().fold(f64::INFINITY, f64::min),
                max_value: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                sample_count: values.len() as i64,
            })
            .collect())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn create(&self, row: &IncidentRow) -> Result<()> {
        self.incidents.lock().insert(row.id, row.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<IncidentRow>> {
        Ok(self.incidents.lock().get(&id).cloned())
    }

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<IncidentRow>> {
        let mut rows: Vec<_> = self
            .incidents
            .lock()
            .values()
            .filter(|i| !i.resolved)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.detected_at.cmp(&a.detected_at))
        });
        Ok(truncate(rows, limit))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<IncidentRow>> {
        let mut rows: Vec<_> = self.incidents.lock().values().cloned().collect();
        rows.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(truncate(rows, limit))
    }

    async fn list_by_severity(
        &self,
        min_severity: IncidentSeverity,
        limit: i64,
    ) -> Result<Vec<IncidentRow>> {
        let mut rows: Vec<_> = self
            .incidents
            .lock()
            .values()
            .filter(|i| i.severity >= min_severity)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.detected_at.cmp(&a.detected_at))
        });
        Ok(truncate(rows, limit))
    }

    async fn mark_resolved(&self, id: Uuid, resolved_at: DateTime<Utc>) -> Result<()> {
        if let Some(row) = self.incidents.lock().get_mut(&id) {
            row.resolved = true;
            row.resolved_at = Some(resolved_at);
        }
        Ok(())
    }

    async fn count_unresolved(&self) -> Result<i64> {
        Ok(self.incidents.lock().values().filter(|i| !i.resolved).count() as i64)
    }
}

#[async_trait]
impl ActionStore for MemoryStore {
    async fn create(&self, row: &ActionRow) -> Result<()> {
        self.actions.lock().insert(row.id, row.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ActionRow>> {
        Ok(self.actions.lock().get(&id).cloned())
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<ActionRow>> {
        let mut rows: Vec<_> = self
            .actions
            .lock()
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(truncate(rows, limit))
    }

    async fn list_by_status(&self, status: ActionStatus, limit: i64) -> Result<Vec<ActionRow>> {
        let mut rows: Vec<_> = self
            .actions
            .lock()
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(truncate(rows, limit))
    }

    async fn list_by_incident(&self, incident_id: Uuid) -> Result<Vec<ActionRow>> {
        let mut rows: Vec<_> = self
            .actions
            .lock()
            .values()
            .filter(|a| a.incident_id == incident_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ActionRow>> {
        let mut rows: Vec<_> = self.actions.lock().values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(truncate(rows, limit))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ActionStatus,
        result_message: &str,
    ) -> Result<()> {
        if let Some(row) = self.actions.lock().get_mut(&id) {
            row.status = status;
            row.result_message = result_message.to_string();
            row.executed_at = Some(Utc::now());
        }
        Ok(())
    }
}
