//! Postgres adapter.
//!
//! Schema matches the deployment: a `metrics` hypertable (TimescaleDB when
//! available), `incidents` and `actions` tables, and the four query-path
//! indexes. Maps are stored as JSONB, ids as UUID.

use crate::{
    ActionRow, ActionStore, AggregatedMetric, IncidentRow, IncidentStore, MetricRow, MetricStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use microcloud_core::config::DbConfig;
use microcloud_core::types::{ActionStatus, ActionType, IncidentSeverity};
use microcloud_core::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

const MIGRATIONS: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS timescaledb CASCADE",
    "CREATE TABLE IF NOT EXISTS metrics (
        time TIMESTAMPTZ NOT NULL,
        tick_id BIGINT NOT NULL,
        node_id UUID,
        service_id UUID,
        metric_name TEXT NOT NULL,
        metric_value DOUBLE PRECISION NOT NULL,
        labels JSONB DEFAULT '{}'
    )",
    "SELECT create_hypertable('metrics', 'time', if_not_exists => TRUE)",
    "CREATE TABLE IF NOT EXISTS incidents (
        id UUID PRIMARY KEY,
        detected_at TIMESTAMPTZ NOT NULL,
        tick_id BIGINT NOT NULL,
        severity INT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        source_service TEXT,
        affected_ids UUID[],
        rule_name TEXT,
        metrics JSONB,
        resolved BOOLEAN DEFAULT FALSE,
        resolved_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS actions (
        id UUID PRIMARY KEY,
        incident_id UUID REFERENCES incidents(id),
        proposed_at_tick BIGINT NOT NULL,
        action_type INT NOT NULL,
        target_id UUID NOT NULL,
        status INT NOT NULL,
        reason TEXT,
        parameters JSONB,
        created_at TIMESTAMPTZ NOT NULL,
        executed_at TIMESTAMPTZ,
        result_message TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_metrics_node ON metrics (node_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_service ON metrics (service_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_incidents_severity ON incidents (severity, detected_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_actions_status ON actions (status, created_at DESC)",
];

const INCIDENT_COLUMNS: &str = "id, detected_at, tick_id, severity, title, description, \
                                source_service, affected_ids, rule_name, metrics, resolved, resolved_at";
const ACTION_COLUMNS: &str = "id, incident_id, proposed_at_tick, action_type, target_id, \
                              status, reason, parameters, created_at, executed_at, result_message";
const METRIC_COLUMNS: &str = "time, tick_id, node_id, service_id, metric_name, metric_value, labels";

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> Error + '_ {
    move |e| Error::storage(format!("{context}: {e}"))
}

/// Postgres-backed implementation of all three repositories
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres using the given configuration
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_conns)
            .min_connections(cfg.min_conns)
            .connect(&cfg.dsn())
            .await
            .map_err(db_err("connect"))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run schema migrations.
    ///
    /// Callers may treat a failure as non-fatal when the schema already
    /// exists or TimescaleDB is absent.
    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err("migration"))?;
        }
        Ok(())
    }
}

fn row_to_metric(row: &PgRow) -> Result<MetricRow> {
    let labels: Option<Json<HashMap<String, String>>> =
        row.try_get("labels").map_err(db_err("scan metric"))?;
    Ok(MetricRow {
        time: row.try_get("time").map_err(db_err("scan metric"))?,
        tick_id: row.try_get("tick_id").map_err(db_err("scan metric"))?,
        node_id: row.try_get("node_id").map_err(db_err("scan metric"))?,
        service_id: row.try_get("service_id").map_err(db_err("scan metric"))?,
        metric_name: row.try_get("metric_name").map_err(db_err("scan metric"))?,
        metric_value: row.try_get("metric_value").map_err(db_err("scan metric"))?,
        labels: labels.map(|l| l.0).unwrap_or_default(),
    })
}

fn row_to_incident(row: &PgRow) -> Result<IncidentRow> {
    let severity: i32 = row.try_get("severity").map_err(db_err("scan incident"))?;
    let metrics: Option<Json<HashMap<String, f64>>> =
        row.try_get("metrics").map_err(db_err("scan incident"))?;
    Ok(IncidentRow {
        id: row.try_get("id").map_err(db_err("scan incident"))?,
        detected_at: row.try_get("detected_at").map_err(db_err("scan incident"))?,
        tick_id: row.try_get("tick_id").map_err(db_err("scan incident"))?,
        severity: IncidentSeverity::from_i32(severity)
            .ok_or_else(|| Error::storage(format!("unknown severity code {severity}")))?,
        title: row.try_get("title").map_err(db_err("scan incident"))?,
        description: row
            .try_get::<Option<String>, _>("description")
            .map_err(db_err("scan incident"))?
            .unwrap_or_default(),
        source_service: row
            .try_get::<Option<String>, _>("source_service")
            .map_err(db_err("scan incident"))?
            .unwrap_or_default(),
        affected_ids: row
            .try_get::<Option<Vec<Uuid>>, _>("affected_ids")
            .map_err(db_err("scan incident"))?
            .unwrap_or_default(),
        rule_name: row
            .try_get::<Option<String>, _>("rule_name")
            .map_err(db_err("scan incident"))?
            .unwrap_or_default(),
        metrics: metrics.map(|m| m.0).unwrap_or_default(),
        resolved: row.try_get("resolved").map_err(db_err("scan incident"))?,
        resolved_at: row.try_get("resolved_at").map_err(db_err("scan incident"))?,
    })
}

fn row_to_action(row: &PgRow) -> Result<ActionRow> {
    let action_type: i32 = row.try_get("action_type").map_err(db_err("scan action"))?;
    let status: i32 = row.try_get("status").map_err(db_err("scan action"))?;
    let parameters: Option<Json<HashMap<String, String>>> =
        row.try_get("parameters").map_err(db_err("scan action"))?;
    Ok(ActionRow {
        id: row.try_get("id").map_err(db_err("scan action"))?,
        incident_id: row.try_get("incident_id").map_err(db_err("scan action"))?,
        proposed_at_tick: row
            .try_get("proposed_at_tick")
            .map_err(db_err("scan action"))?,
        action_type: ActionType::from_i32(action_type)
            .ok_or_else(|| Error::storage(format!("unknown action type code {action_type}")))?,
        target_id: row.try_get("target_id").map_err(db_err("scan action"))?,
        status: ActionStatus::from_i32(status)
            .ok_or_else(|| Error::storage(format!("unknown action status code {status}")))?,
        reason: row
            .try_get::<Option<String>, _>("reason")
            .map_err(db_err("scan action"))?
            .unwrap_or_default(),
        parameters: parameters.map(|p| p.0).unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(db_err("scan action"))?,
        executed_at: row.try_get("executed_at").map_err(db_err("scan action"))?,
        result_message: row
            .try_get::<Option<String>, _>("result_message")
            .map_err(db_err("scan action"))?
            .unwrap_or_default(),
    })
}

#[async_trait]
impl MetricStore for PostgresStore {
    async fn insert_batch(&self, rows: &[MetricRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_err("begin batch"))?;
        for row in rows {
            sqlx::query(
                "INSERT INTO metrics (time, tick_id, node_id, service_id, metric_name, metric_value, labels)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(row.time)
            .bind(row.tick_id)
            .bind(row.node_id)
            .bind(row.service_id)
            .bind(&row.metric_name)
            .bind(row.metric_value)
            .bind(Json(&row.labels))
            .execute(&mut *tx)
            .await
            .map_err(db_err("insert metric"))?;
        }
        tx.commit().await.map_err(db_err("commit batch"))?;
        Ok(())
    }

    async fn query_range(
        &self,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MetricRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {METRIC_COLUMNS} FROM metrics
             WHERE time >= $1 AND time < $2 AND metric_name = $3
             ORDER BY time DESC LIMIT $4"
        ))
        .bind(start)
        .bind(end)
        .bind(metric_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("query metrics"))?;
        rows.iter().map(row_to_metric).collect()
    }

    async fn latest_for_node(&self, node_id: Uuid, limit: i64) -> Result<Vec<MetricRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {METRIC_COLUMNS} FROM metrics
             WHERE node_id = $1 ORDER BY time DESC LIMIT $2"
        ))
        .bind(node_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("query node metrics"))?;
        rows.iter().map(row_to_metric).collect()
    }

    async fn latest_for_service(&self, service_id: Uuid, limit: i64) -> Result<Vec<MetricRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {METRIC_COLUMNS} FROM metrics
             WHERE service_id = $1 ORDER BY time DESC LIMIT $2"
        ))
        .bind(service_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("query service metrics"))?;
        rows.iter().map(row_to_metric).collect()
    }

    async fn aggregate(
        &self,
        metric_name: &str,
        bucket: chrono::Duration,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
    ) -> Result<Vec<AggregatedMetric>> {
        let interval = format!("{} seconds", bucket.num_seconds().max(1));
        let rows = sqlx::query(
            "SELECT time_bucket($1::interval, time) AS bucket,
                    AVG(metric_value) AS avg_value,
                    MIN(metric_value) AS min_value,
                    MAX(metric_value) AS max_value,
                    COUNT(*) AS sample_count
             FROM metrics
             WHERE metric_name = $2 AND time >= $3 AND time < $4
             GROUP BY bucket
             ORDER BY bucket DESC",
        )
        .bind(interval)
        .bind(metric_name)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("aggregate metrics"))?;

        rows.iter()
            .map(|row| {
                Ok(AggregatedMetric {
                    bucket: row.try_get("bucket").map_err(db_err("scan aggregate"))?,
                    avg_value: row.try_get("avg_value").map_err(db_err("scan aggregate"))?,
                    min_value: row.try_get("min_value").map_err(db_err("scan aggregate"))?,
                    max_value: row.try_get("max_value").map_err(db_err("scan aggregate"))?,
                    sample_count: row
                        .try_get("sample_count")
                        .map_err(db_err("scan aggregate"))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl IncidentStore for PostgresStore {
    async fn create(&self, row: &IncidentRow) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO incidents ({INCIDENT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(row.id)
        .bind(row.detected_at)
        .bind(row.tick_id)
        .bind(row.severity.as_i32())
        .bind(&row.title)
        .bind(&row.description)
        .bind(&row.source_service)
        .bind(&row.affected_ids)
        .bind(&row.rule_name)
        .bind(Json(&row.metrics))
        .bind(row.resolved)
        .bind(row.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("create incident"))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<IncidentRow>> {
        let row = sqlx::query(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get incident"))?;
        row.as_ref().map(row_to_incident).transpose()
    }

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<IncidentRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents
             WHERE resolved = FALSE
             ORDER BY severity DESC, detected_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list unresolved"))?;
        rows.iter().map(row_to_incident).collect()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<IncidentRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents
             ORDER BY detected_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list recent incidents"))?;
        rows.iter().map(row_to_incident).collect()
    }

    async fn list_by_severity(
        &self,
        min_severity: IncidentSeverity,
        limit: i64,
    ) -> Result<Vec<IncidentRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents
             WHERE severity >= $1
             ORDER BY severity DESC, detected_at DESC LIMIT $2"
        ))
        .bind(min_severity.as_i32())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list by severity"))?;
        rows.iter().map(row_to_incident).collect()
    }

    async fn mark_resolved(&self, id: Uuid, resolved_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE incidents SET resolved = TRUE, resolved_at = $2 WHERE id = $1")
            .bind(id)
            .bind(resolved_at)
            .execute(&self.pool)
            .await
            .map_err(db_err("mark resolved"))?;
        Ok(())
    }

    async fn count_unresolved(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM incidents WHERE resolved = FALSE")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("count unresolved"))?;
        row.try_get("n").map_err(db_err("count unresolved"))
    }
}

#[async_trait]
impl ActionStore for PostgresStore {
    async fn create(&self, row: &ActionRow) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO actions ({ACTION_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(row.id)
        .bind(row.incident_id)
        .bind(row.proposed_at_tick)
        .bind(row.action_type.as_i32())
        .bind(row.target_id)
        .bind(row.status.as_i32())
        .bind(&row.reason)
        .bind(Json(&row.parameters))
        .bind(row.created_at)
        .bind(row.executed_at)
        .bind(&row.result_message)
        .execute(&self.pool)
        .await
        .map_err(db_err("create action"))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ActionRow>> {
        let row = sqlx::query(&format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get action"))?;
        row.as_ref().map(row_to_action).transpose()
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<ActionRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM actions
             WHERE status = $1 ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(ActionStatus::Pending.as_i32())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list pending"))?;
        rows.iter().map(row_to_action).collect()
    }

    async fn list_by_status(&self, status: ActionStatus, limit: i64) -> Result<Vec<ActionRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM actions
             WHERE status = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(status.as_i32())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list by status"))?;
        rows.iter().map(row_to_action).collect()
    }

    async fn list_by_incident(&self, incident_id: Uuid) -> Result<Vec<ActionRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM actions
             WHERE incident_id = $1 ORDER BY created_at ASC"
        ))
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list by incident"))?;
        rows.iter().map(row_to_action).collect()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<ActionRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM actions
             ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list recent actions"))?;
        rows.iter().map(row_to_action).collect()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ActionStatus,
        result_message: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE actions SET status = $2, result_message = $3, executed_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_i32())
        .bind(result_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err("update action status"))?;
        Ok(())
    }
}
