//! Typed publishing wrapper over a [`BusDriver`].

use crate::{
    codec, BusDriver, SUBJECT_OPS_ACTIONS, SUBJECT_OPS_COMMANDS, SUBJECT_OPS_INCIDENTS,
    SUBJECT_SIM_EVENTS, SUBJECT_SIM_METRICS,
};
use microcloud_core::types::{Action, ApplyActionCommand, Incident, MetricSnapshot, SimulationEvent};
use microcloud_core::Result;
use serde::Serialize;
use std::sync::Arc;

/// Typed publisher for the five bus subjects
#[derive(Clone)]
pub struct Publisher {
    driver: Arc<dyn BusDriver>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

impl Publisher {
    /// Create a publisher over a driver
    pub fn new(driver: Arc<dyn BusDriver>) -> Self {
        Self { driver }
    }

    /// Publish a metric snapshot to `sim.metrics`
    pub async fn publish_snapshot(&self, snapshot: &MetricSnapshot) -> Result<()> {
        self.publish(SUBJECT_SIM_METRICS, snapshot).await
    }

    /// Publish a simulation event to `sim.events`
    pub async fn publish_event(&self, event: &SimulationEvent) -> Result<()> {
        self.publish(SUBJECT_SIM_EVENTS, event).await
    }

    /// Publish an incident to `ops.incidents`
    pub async fn publish_incident(&self, incident: &Incident) -> Result<()> {
        self.publish(SUBJECT_OPS_INCIDENTS, incident).await
    }

    /// Publish a proposed action to `ops.actions`
    pub async fn publish_action(&self, action: &Action) -> Result<()> {
        self.publish(SUBJECT_OPS_ACTIONS, action).await
    }

    /// Publish an approved command to `ops.commands`
    pub async fn publish_command(&self, cmd: &ApplyActionCommand) -> Result<()> {
        self.publish(SUBJECT_OPS_COMMANDS, cmd).await
    }

    async fn publish<T: Serialize>(&self, subject: &str, msg: &T) -> Result<()> {
        let payload = codec::encode(msg)?;
        self.driver.publish(subject, payload).await
    }
}
