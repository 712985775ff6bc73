//! Tick loop and command application.

use crate::state::SimState;
use metrics::counter;
use microcloud_bus::Publisher;
use microcloud_core::types::{ApplyActionCommand, SimulationState};
use microcloud_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default tick interval
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the simulation loop and applies approved commands.
///
/// State access is serialized: the tick and command paths take the write
/// lock, snapshot reads take the read lock.
#[derive(Debug, Clone)]
pub struct Engine {
    state: Arc<RwLock<SimState>>,
    publisher: Publisher,
    tick_interval: Duration,
}

impl Engine {
    /// Create an engine with the default fleet and tick interval
    pub fn new(publisher: Publisher) -> Self {
        Self::with_state(publisher, SimState::new())
    }

    /// Create an engine over a prepared state (tests, scenarios)
    pub fn with_state(publisher: Publisher, state: SimState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            publisher,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Override the tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Shared handle to the simulation state, for the control surface
    pub fn state(&self) -> Arc<RwLock<SimState>> {
        self.state.clone()
    }

    /// Run the tick loop until cancelled.
    ///
    /// While the simulation is paused or stopped the tick is skipped but the
    /// loop keeps running.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_interval_ms = self.tick_interval.as_millis() as u64, "simulation engine started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("simulation engine stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    {
                        let mut state = self.state.write().await;
                        if state.run_state() != SimulationState::Running {
                            continue;
                        }
                        state.tick(self.tick_interval);
                    }

                    let snapshot = self.state.read().await.snapshot();

                    if let Err(err) = self.publisher.publish_snapshot(&snapshot).await {
                        error!(error = %err, "failed to publish metrics");
                    } else {
                        counter!("microcloud_snapshots_published_total").increment(1);
                    }

                    if snapshot.timestamp.tick_id % 100 == 0 {
                        debug!(
                            tick_id = snapshot.timestamp.tick_id,
                            nodes = snapshot.nodes.len(),
                            services = snapshot.services.len(),
                            "tick"
                        );
                    }
                }
            }
        }
    }

    /// Apply an approved command and publish the resulting simulation event.
    ///
    /// Mutation and event publication are serialized under the state lock so
    /// events appear in application order.
    pub async fn apply_command(&self, cmd: ApplyActionCommand) -> Result<()> {
        let mut state = self.state.write().await;
        let event = state.apply(cmd.action_type, cmd.target_id, cmd.parameters);

        info!(
            action_id = %cmd.action_id,
            action_type = ?cmd.action_type,
            target_id = %cmd.target_id,
            event_type = %event.event_type,
            "command applied"
        );
        counter!("microcloud_commands_applied_total").increment(1);

        if let Err(err) = self.publisher.publish_event(&event).await {
            error!(error = %err, "failed to publish event");
        }

        Ok(())
    }
}
