//! Simulation control HTTP surface.
//!
//! JSON-over-HTTP unary RPCs under `/sim.v1.SimulationControl/`:
//! - `GetState` - run state, speed, current tick, active scenario
//! - `SetState` - play / pause / stop
//! - `SetSpeed` - speed multiplier, clamped to [0.1, 10.0]
//! - `LoadScenario` - switch overlays; unknown names are rejected at the
//!   application layer

use crate::state::{Scenario, SimState};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use microcloud_core::types::SimulationState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the control handlers
#[derive(Debug, Clone)]
pub struct ControlState {
    pub state: Arc<RwLock<SimState>>,
}

impl ControlState {
    /// Create control state over the engine's simulation state
    pub fn new(state: Arc<RwLock<SimState>>) -> Self {
        Self { state }
    }
}

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Current simulation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStateResponse {
    pub state: SimulationState,
    pub speed_multiplier: f64,
    pub current_tick: i64,
    pub active_scenario: String,
}

/// Request to change the run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStateRequest {
    pub state: SimulationState,
}

/// Acknowledged run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStateResponse {
    pub state: SimulationState,
}

/// Request to change the speed multiplier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSpeedRequest {
    pub speed_multiplier: f64,
}

/// Effective (clamped) speed multiplier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSpeedResponse {
    pub speed_multiplier: f64,
}

/// Request to load a scenario by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadScenarioRequest {
    pub scenario_name: String,
}

/// Scenario load outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadScenarioResponse {
    pub success: bool,
    pub message: String,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// POST /sim.v1.SimulationControl/GetState
pub async fn get_state(State(ctrl): State<Arc<ControlState>>) -> Json<GetStateResponse> {
    let state = ctrl.state.read().await;
    Json(GetStateResponse {
        state: state.run_state(),
        speed_multiplier: state.speed_multiplier(),
        current_tick: state.tick_id(),
        active_scenario: state.scenario().as_str().to_string(),
    })
}

/// POST /sim.v1.SimulationControl/SetState
pub async fn set_state(
    State(ctrl): State<Arc<ControlState>>,
    Json(req): Json<SetStateRequest>,
) -> Json<SetStateResponse> {
    let mut state = ctrl.state.write().await;
    let old = state.run_state();
    state.set_run_state(req.state);
    info!(from = ?old, to = ?req.state, "simulation state changed");
    Json(SetStateResponse { state: req.state })
}

/// POST /sim.v1.SimulationControl/SetSpeed
pub async fn set_speed(
    State(ctrl): State<Arc<ControlState>>,
    Json(req): Json<SetSpeedRequest>,
) -> Json<SetSpeedResponse> {
    let mut state = ctrl.state.write().await;
    let effective = state.set_speed_multiplier(req.speed_multiplier);
    info!(multiplier = effective, "simulation speed changed");
    Json(SetSpeedResponse {
        speed_multiplier: effective,
    })
}

/// POST /sim.v1.SimulationControl/LoadScenario
pub async fn load_scenario(
    State(ctrl): State<Arc<ControlState>>,
    Json(req): Json<LoadScenarioRequest>,
) -> Json<LoadScenarioResponse> {
    let Ok(scenario) = req.scenario_name.parse::<Scenario>() else {
        return Json(LoadScenarioResponse {
            success: false,
            message: format!("unknown scenario: {}", req.scenario_name),
        });
    };

    ctrl.state.write().await.set_scenario(scenario);
    info!(scenario = scenario.as_str(), "scenario loaded");
    Json(LoadScenarioResponse {
        success: true,
        message: format!("scenario loaded: {}", scenario.as_str()),
    })
}

/// Build the simulation control router
pub fn control_router(ctrl: Arc<ControlState>) -> Router {
    Router::new()
        .route("/sim.v1.SimulationControl/GetState", post(get_state))
        .route("/sim.v1.SimulationControl/SetState", post(set_state))
        .route("/sim.v1.SimulationControl/SetSpeed", post(set_speed))
        .route("/sim.v1.SimulationControl/LoadScenario", post(load_scenario))
        .with_state(ctrl)
        .layer(TraceLayer::new_for_http())
}
