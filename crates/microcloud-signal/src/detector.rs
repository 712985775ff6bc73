//! Snapshot processing: metric persistence and windowed rule evaluation.

use crate::rules::{default_rules, Rule};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use microcloud_bus::Publisher;
use microcloud_core::types::{Incident, MetricSnapshot, SimulationTimestamp};
use microcloud_core::Result;
use microcloud_storage::{MetricRow, MetricStore};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Windows below this sample count never fire
const MIN_WINDOW_SAMPLES: usize = 3;
/// Breach ratio above which an inactive latch raises an incident
const RAISE_RATIO: f64 = 0.7;
/// Breach ratio below which an active latch clears
const CLEAR_RATIO: f64 = 0.3;

const SOURCE_SERVICE: &str = "signal-service";

/// Kind of entity a window tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Service,
}

impl EntityKind {
    /// Lowercase name used in incident titles
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Service => "service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    kind: EntityKind,
    entity_id: Uuid,
    rule: String,
}

#[derive(Debug, Default)]
struct SlidingWindow {
    samples: VecDeque<(DateTime<Utc>, f64)>,
}

impl SlidingWindow {
    fn push(&mut self, at: DateTime<Utc>, value: f64) {
        self.samples.push_back((at, value));
    }

    /// Evict samples with timestamp <= cutoff
    fn evict(&mut self, cutoff: DateTime<Utc>) {
        while matches!(self.samples.front(), Some((at, _)) if *at <= cutoff) {
            self.samples.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn breach_ratio(&self, rule: &Rule) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let breaches = self
            .samples
            .iter()
            .filter(|(_, value)| rule.evaluate(*value))
            .count();
        breaches as f64 / self.samples.len() as f64
    }
}

#[derive(Debug, Default)]
struct DetectorInner {
    windows: HashMap<WindowKey, SlidingWindow>,
    active: HashSet<WindowKey>,
}

/// Consumes metric snapshots, persists them and raises incidents.
///
/// The latch per `(entity, rule)` implements hysteresis: raise above a 0.7
/// breach ratio, clear below 0.3, no transition inside the band.
pub struct Detector {
    publisher: Publisher,
    metrics: Arc<dyn MetricStore>,
    rules: Vec<Rule>,
    inner: Mutex<DetectorInner>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl Detector {
    /// Create a detector with the default rule set
    pub fn new(publisher: Publisher, metrics: Arc<dyn MetricStore>) -> Self {
        Self::with_rules(publisher, metrics, default_rules())
    }

    /// Create a detector with a custom rule set
    pub fn with_rules(publisher: Publisher, metrics: Arc<dyn MetricStore>, rules: Vec<Rule>) -> Self {
        Self {
            publisher,
            metrics,
            rules,
            inner: Mutex::new(DetectorInner::default()),
        }
    }

    /// Process one snapshot: store the flattened metric batch and evaluate
    /// every rule for every entity.
    ///
    /// Persistence and publish failures are logged; the published incident
    /// stream stays authoritative.
    pub async fn process_snapshot(&self, snapshot: &MetricSnapshot) -> Result<()> {
        let now = Utc::now();

        let rows = flatten(snapshot, now);
        let incidents = self.evaluate_at(snapshot, now);

        if let Err(err) = self.metrics.insert_batch(&rows).await {
            error!(error = %err, "failed to store metrics");
            counter!("microcloud_metric_store_errors_total").increment(1);
        } else {
            counter!("microcloud_metric_rows_stored_total").increment(rows.len() as u64);
        }

        for incident in incidents {
            match self.publisher.publish_incident(&incident).await {
                Ok(()) => {
                    warn!(
                        rule = %incident.rule_name,
                        entity = %incident.affected_ids[0],
                        severity = ?incident.severity,
                        "incident detected"
                    );
                    counter!("microcloud_incidents_raised_total").increment(1);
                }
                Err(err) => error!(error = %err, "failed to publish incident"),
            }
        }

        Ok(())
    }

    /// Evaluate all rules against one snapshot at an explicit observation
    /// time, returning the incidents to publish.
    pub fn evaluate_at(&self, snapshot: &MetricSnapshot, now: DateTime<Utc>) -> Vec<Incident> {
        let mut inner = self.inner.lock();
        let mut incidents = Vec::new();
        let tick_id = snapshot.timestamp.tick_id;

        for node in &snapshot.nodes {
            let metrics = [
                ("cpu_usage_percent", node.cpu_usage_percent),
                ("memory_usage_percent", node.memory_usage_percent),
                ("disk_usage_percent", node.disk_usage_percent),
            ];
            self.check_entity(
                &mut inner,
                EntityKind::Node,
                node.id,
                &metrics,
                tick_id,
                now,
                &mut incidents,
            );
        }

        for svc in &snapshot.services {
            let metrics = [
                ("error_rate_percent", svc.error_rate_percent),
                ("latency_p50_ms", svc.latency_p50_ms),
                ("latency_p99_ms", svc.latency_p99_ms),
            ];
            self.check_entity(
                &mut inner,
                EntityKind::Service,
                svc.id,
                &metrics,
                tick_id,
                now,
                &mut incidents,
            );
        }

        incidents
    }

    #[allow(clippy::too_many_arguments)]
    fn check_entity(
        &self,
        inner: &mut DetectorInner,
        kind: EntityKind,
        entity_id: Uuid,
        metrics: &[(&str, f64)],
        tick_id: i64,
        now: DateTime<Utc>,
        incidents: &mut Vec<Incident>,
    ) {
        for rule in &self.rules {
            let Some(&(_, value)) = metrics.iter().find(|(name, _)| *name == rule.metric_name)
            else {
                continue;
            };

            let key = WindowKey {
                kind,
                entity_id,
                rule: rule.name.clone(),
            };

            let window = inner.windows.entry(key.clone()).or_default();
            window.push(now, value);
            window.evict(now - Duration::seconds(rule.window_seconds as i64));

            if window.len() < MIN_WINDOW_SAMPLES {
                continue;
            }

            let ratio = window.breach_ratio(rule);
            if ratio > RAISE_RATIO && !inner.active.contains(&key) {
                inner.active.insert(key);
                incidents.push(build_incident(rule, kind, entity_id, value, tick_id, now));
            } else if ratio < CLEAR_RATIO && inner.active.contains(&key) {
                inner.active.remove(&key);
                info!(rule = %rule.name, entity = %entity_id, "incident cleared");
            }
        }
    }

    /// Number of active `(entity, rule)` latches
    pub fn active_incidents(&self) -> usize {
        self.inner.lock().active.len()
    }
}

fn build_incident(
    rule: &Rule,
    kind: EntityKind,
    entity_id: Uuid,
    value: f64,
    tick_id: i64,
    now: DateTime<Utc>,
) -> Incident {
    let id_text = entity_id.to_string();
    Incident {
        id: Uuid::new_v4(),
        detected_at: SimulationTimestamp {
            tick_id,
            wall_time_unix_ms: now.timestamp_millis(),
            sim_time_unix_ms: 0,
        },
        severity: rule.severity,
        title: format!(
            "{}: {} on {} {}",
            rule.name,
            rule.metric_name,
            kind.as_str(),
            &id_text[..8]
        ),
        description: format!(
            "{} breached threshold {:.2} (current: {:.2}) for {} seconds",
            rule.metric_name, rule.threshold, value, rule.window_seconds
        ),
        source_service: SOURCE_SERVICE.to_string(),
        affected_ids: vec![entity_id],
        rule_name: rule.name.clone(),
        metrics: HashMap::from([(rule.metric_name.clone(), value)]),
        resolved: false,
        resolved_at: None,
    }
}

fn flatten(snapshot: &MetricSnapshot, now: DateTime<Utc>) -> Vec<MetricRow> {
    let tick_id = snapshot.timestamp.tick_id;
    let mut rows = Vec::with_capacity(snapshot.nodes.len() * 3 + snapshot.services.len() * 4);

    for node in &snapshot.nodes {
        for (name, value) in [
            ("cpu_usage_percent", node.cpu_usage_percent),
            ("memory_usage_percent", node.memory_usage_percent),
            ("disk_usage_percent", node.disk_usage_percent),
        ] {
            rows.push(MetricRow {
                time: now,
                tick_id,
                node_id: Some(node.id),
                service_id: None,
                metric_name: name.to_string(),
                metric_value: value,
                labels: HashMap::new(),
            });
        }
    }

    for svc in &snapshot.services {
        for (name, value) in [
            ("requests_per_second", svc.requests_per_second),
            ("error_rate_percent", svc.error_rate_percent),
            ("latency_p50_ms", svc.latency_p50_ms),
            ("latency_p99_ms", svc.latency_p99_ms),
        ] {
            rows.push(MetricRow {
                time: now,
                tick_id,
                node_id: None,
                service_id: Some(svc.id),
                metric_name: name.to_string(),
                metric_value: value,
                labels: HashMap::new(),
            });
        }
    }

    rows
}
