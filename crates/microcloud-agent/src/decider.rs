//! Decision table and cooldown enforcement.

use chrono::Utc;
use metrics::counter;
use microcloud_bus::Publisher;
use microcloud_core::types::{
    Action, ActionStatus, ActionType, Incident, IncidentSeverity, SimulationTimestamp,
};
use microcloud_core::{Error, Result};
use microcloud_storage::{ActionRow, ActionStore, IncidentRow, IncidentStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default minimum interval between two proposals for the same
/// `(rule, target)` pair
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Proposes at most one action per incident, suppressing repeats within the
/// cooldown window.
pub struct Decider {
    publisher: Publisher,
    actions: Arc<dyn ActionStore>,
    incidents: Arc<dyn IncidentStore>,
    cooldown: Duration,
    recent: Mutex<HashMap<(String, Uuid), Instant>>,
}

impl std::fmt::Debug for Decider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decider")
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl Decider {
    /// Create a decider with the default cooldown
    pub fn new(
        publisher: Publisher,
        actions: Arc<dyn ActionStore>,
        incidents: Arc<dyn IncidentStore>,
    ) -> Self {
        Self::with_cooldown(publisher, actions, incidents, DEFAULT_COOLDOWN)
    }

    /// Create a decider with an explicit cooldown
    pub fn with_cooldown(
        publisher: Publisher,
        actions: Arc<dyn ActionStore>,
        incidents: Arc<dyn IncidentStore>,
        cooldown: Duration,
    ) -> Self {
        Self {
            publisher,
            actions,
            incidents,
            cooldown,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one incident: persist it, then propose an action unless the
    /// decision table skips it or the cooldown suppresses it.
    ///
    /// Persistence failures are logged and do not abort the path; a publish
    /// failure is returned so the incident is redelivered.
    pub async fn process_incident(&self, incident: &Incident) -> Result<()> {
        let mut recent = self.recent.lock().await;

        if let Err(err) = self.incidents.create(&IncidentRow::from(incident)).await {
            error!(error = %err, "failed to store incident");
        }

        let Some(&target_id) = incident.affected_ids.first() else {
            warn!(incident_id = %incident.id, rule = %incident.rule_name, "incident has no affected entities");
            return Ok(());
        };

        let key = (incident.rule_name.clone(), target_id);
        if let Some(last) = recent.get(&key) {
            if last.elapsed() < self.cooldown {
                debug!(rule = %key.0, target = %key.1, "action cooldown active");
                counter!("microcloud_actions_suppressed_total").increment(1);
                return Ok(());
            }
        }

        let Some(action) = decide_action(incident, target_id) else {
            debug!(rule = %incident.rule_name, "no action rule for incident");
            return Ok(());
        };

        if let Err(err) = self.actions.create(&ActionRow::from(&action)).await {
            error!(error = %err, "failed to store action");
        }

        self.publisher
            .publish_action(&action)
            .await
            .map_err(|err| Error::bus(format!("publish action: {err}")))?;

        recent.insert(key, Instant::now());
        counter!("microcloud_actions_proposed_total").increment(1);
        info!(
            action_type = ?action.action_type,
            target = %action.target_id,
            reason = %action.reason,
            "action proposed"
        );

        Ok(())
    }
}

/// The rule-to-action table. Unknown rules propose nothing.
fn decide_action(incident: &Incident, target_id: Uuid) -> Option<Action> {
    let metric = |name: &str| incident.metrics.get(name).copied().unwrap_or_default();

    let (action_type, reason) = match incident.rule_name.as_str() {
        "high_error_rate" | "critical_error_rate" => (
            ActionType::RestartService,
            format!(
                "Auto-restart due to {} (error rate: {:.2}%)",
                incident.rule_name,
                metric("error_rate_percent")
            ),
        ),
        "high_cpu_usage" | "critical_cpu_usage" => {
            if incident.severity == IncidentSeverity::Critical {
                (
                    ActionType::ScaleUp,
                    format!("Scale up due to critical CPU ({:.2}%)", metric("cpu_usage_percent")),
                )
            } else {
                (
                    ActionType::RebalanceTraffic,
                    format!(
                        "Rebalance traffic due to high CPU ({:.2}%)",
                        metric("cpu_usage_percent")
                    ),
                )
            }
        }
        "high_memory_usage" => (
            ActionType::RestartService,
            format!(
                "Restart due to high memory usage ({:.2}%)",
                metric("memory_usage_percent")
            ),
        ),
        "high_latency" => (
            ActionType::ScaleUp,
            format!("Scale up due to high latency ({:.2}ms)", metric("latency_p99_ms")),
        ),
        _ => return None,
    };

    let tick_id = incident.detected_at.tick_id;
    Some(Action {
        id: Uuid::new_v4(),
        incident_id: incident.id,
        proposed_at_tick: tick_id,
        action_type,
        target_id,
        status: ActionStatus::Pending,
        reason,
        parameters: HashMap::new(),
        created_at: SimulationTimestamp {
            tick_id,
            wall_time_unix_ms: Utc::now().timestamp_millis(),
            sim_time_unix_ms: 0,
        },
        executed_at: None,
        result_message: String::new(),
    })
}
