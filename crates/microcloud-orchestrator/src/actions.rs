//! Action service RPC handlers.
//!
//! JSON-over-HTTP unary RPCs under `/ops.v1.ActionService/`:
//! - `ListPendingActions` - pending actions, oldest first (default limit 50)
//! - `ApproveAction` - requires `PENDING`; publishes an `ApplyActionCommand`
//! - `RejectAction` - terminal; reason is stored as the result message
//! - `GetActionHistory` - most recent actions (default limit 100)

use crate::ApiError;
use axum::extract::State;
use axum::Json;
use microcloud_bus::Publisher;
use microcloud_core::types::{Action, ActionStatus, ApplyActionCommand};
use microcloud_storage::ActionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const DEFAULT_PENDING_LIMIT: i64 = 50;
const DEFAULT_HISTORY_LIMIT: i64 = 100;

/// Shared state for the action service handlers
#[derive(Clone)]
pub struct ActionServiceState {
    pub actions: Arc<dyn ActionStore>,
    pub publisher: Publisher,
}

impl std::fmt::Debug for ActionServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionServiceState").finish_non_exhaustive()
    }
}

impl ActionServiceState {
    /// Create the handler state
    pub fn new(actions: Arc<dyn ActionStore>, publisher: Publisher) -> Self {
        Self { actions, publisher }
    }
}

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Wrapped UUID as sent on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UuidValue {
    pub value: Uuid,
}

/// Request for pending actions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPendingActionsRequest {
    #[serde(default)]
    pub limit: i64,
}

/// Pending actions, oldest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPendingActionsResponse {
    pub actions: Vec<Action>,
}

/// Request to approve one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveActionRequest {
    pub action_id: UuidValue,
}

/// Approval outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveActionResponse {
    pub success: bool,
    pub message: String,
}

/// Request to reject one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectActionRequest {
    pub action_id: UuidValue,
    #[serde(default)]
    pub reason: String,
}

/// Rejection outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectActionResponse {
    pub success: bool,
}

/// Request for recent actions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetActionHistoryRequest {
    #[serde(default)]
    pub limit: i64,
}

/// Recent actions, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetActionHistoryResponse {
    pub actions: Vec<Action>,
    pub total_count: i64,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// POST /ops.v1.ActionService/ListPendingActions
pub async fn list_pending_actions(
    State(state): State<Arc<ActionServiceState>>,
    req: Option<Json<ListPendingActionsRequest>>,
) -> Result<Json<ListPendingActionsResponse>, ApiError> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let limit = if req.limit <= 0 {
        DEFAULT_PENDING_LIMIT
    } else {
        req.limit
    };

    let rows = state.actions.list_pending(limit).await?;
    Ok(Json(ListPendingActionsResponse {
        actions: rows.iter().map(|r| r.to_action()).collect(),
    }))
}

/// POST /ops.v1.ActionService/ApproveAction
///
/// Only `PENDING` actions may be approved; anything else is a precondition
/// failure and publishes no command.
pub async fn approve_action(
    State(state): State<Arc<ActionServiceState>>,
    Json(req): Json<ApproveActionRequest>,
) -> Result<Json<ApproveActionResponse>, ApiError> {
    let action_id = req.action_id.value;

    let row = state
        .actions
        .get(action_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("action {action_id}")))?;

    if row.status != ActionStatus::Pending {
        return Err(ApiError::FailedPrecondition(format!(
            "action {action_id} is {:?}, not PENDING",
            row.status
        )));
    }

    state
        .actions
        .update_status(action_id, ActionStatus::Approved, "")
        .await?;

    let cmd = ApplyActionCommand {
        action_id,
        target_tick_id: row.proposed_at_tick,
        action_type: row.action_type,
        target_id: row.target_id,
        parameters: row.parameters.clone(),
    };
    state
        .publisher
        .publish_command(&cmd)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    info!(action_id = %action_id, action_type = ?row.action_type, "action approved");

    Ok(Json(ApproveActionResponse {
        success: true,
        message: "Action approved and command published".to_string(),
    }))
}

/// POST /ops.v1.ActionService/RejectAction
pub async fn reject_action(
    State(state): State<Arc<ActionServiceState>>,
    Json(req): Json<RejectActionRequest>,
) -> Result<Json<RejectActionResponse>, ApiError> {
    let action_id = req.action_id.value;

    state
        .actions
        .update_status(action_id, ActionStatus::Rejected, &req.reason)
        .await?;

    info!(action_id = %action_id, reason = %req.reason, "action rejected");

    Ok(Json(RejectActionResponse { success: true }))
}

/// POST /ops.v1.ActionService/GetActionHistory
pub async fn get_action_history(
    State(state): State<Arc<ActionServiceState>>,
    req: Option<Json<GetActionHistoryRequest>>,
) -> Result<Json<GetActionHistoryResponse>, ApiError> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let limit = if req.limit <= 0 {
        DEFAULT_HISTORY_LIMIT
    } else {
        req.limit
    };

    let rows = state.actions.list_recent(limit).await?;
    Ok(Json(GetActionHistoryResponse {
        total_count: rows.len() as i64,
        actions: rows.iter().map(|r| r.to_action()).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::StreamExt;
    use microcloud_bus::{codec, BusDriver, MemoryBus, SUBJECT_OPS_COMMANDS};
    use microcloud_core::types::ActionType;
    use microcloud_storage::{ActionRow, MemoryStore};
    use std::collections::HashMap;

    fn pending_action() -> ActionRow {
        ActionRow {
            id: Uuid::new_v4(),
            incident_id: Uuid::new_v4(),
            proposed_at_tick: 314,
            action_type: ActionType::ScaleUp,
            target_id: Uuid::new_v4(),
            status: ActionStatus::Pending,
            reason: "Scale up due to high latency (650.00ms)".to_string(),
            parameters: HashMap::from([("step".to_string(), "1".to_string())]),
            created_at: Utc::now(),
            executed_at: None,
            result_message: String::new(),
        }
    }

    fn service_state() -> (Arc<ActionServiceState>, Arc<MemoryStore>, Arc<dyn BusDriver>) {
        let driver: Arc<dyn BusDriver> = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(ActionServiceState::new(
            store.clone(),
            Publisher::new(driver.clone()),
        ));
        (state, store, driver)
    }

    #[tokio::test]
    async fn approve_unknown_action_is_not_found_and_publishes_nothing() {
        let (state, _, driver) = service_state();
        let mut commands = driver.subscribe(SUBJECT_OPS_COMMANDS, "t").await.unwrap();

        let err = approve_action(
            State(state),
            Json(ApproveActionRequest {
                action_id: UuidValue { value: Uuid::new_v4() },
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::NotFound(_)));
        let silence =
            tokio::time::timeout(std::time::Duration::from_millis(50), commands.next()).await;
        assert!(silence.is_err(), "no command expected");
    }

    #[tokio::test]
    async fn approve_pending_action_publishes_matching_command() {
        let (state, store, driver) = service_state();
        let mut commands = driver.subscribe(SUBJECT_OPS_COMMANDS, "t").await.unwrap();

        let row = pending_action();
        store.create(&row).await.unwrap();

        let resp = approve_action(
            State(state),
            Json(ApproveActionRequest {
                action_id: UuidValue { value: row.id },
            }),
        )
        .await
        .unwrap()
        .0;
        assert!(resp.success);

        let stored = store.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Approved);

        let delivery = commands.next().await.unwrap();
        let cmd: ApplyActionCommand = codec::decode(&delivery.payload).unwrap();
        assert_eq!(cmd.action_id, row.id);
        assert_eq!(cmd.target_tick_id, row.proposed_at_tick);
        assert_eq!(cmd.action_type, row.action_type);
        assert_eq!(cmd.target_id, row.target_id);
        assert_eq!(cmd.parameters, row.parameters);
    }

    #[tokio::test]
    async fn approve_non_pending_action_is_a_precondition_failure() {
        let (state, store, driver) = service_state();
        let mut commands = driver.subscribe(SUBJECT_OPS_COMMANDS, "t").await.unwrap();

        let mut row = pending_action();
        row.status = ActionStatus::Rejected;
        store.create(&row).await.unwrap();

        let err = approve_action(
            State(state),
            Json(ApproveActionRequest {
                action_id: UuidValue { value: row.id },
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::FailedPrecondition(_)));
        assert_eq!(
            store.get(row.id).await.unwrap().unwrap().status,
            ActionStatus::Rejected
        );
        let silence =
            tokio::time::timeout(std::time::Duration::from_millis(50), commands.next()).await;
        assert!(silence.is_err(), "no command expected");
    }

    #[tokio::test]
    async fn reject_stores_the_reason() {
        let (state, store, _) = service_state();
        let row = pending_action();
        store.create(&row).await.unwrap();

        let resp = reject_action(
            State(state),
            Json(RejectActionRequest {
                action_id: UuidValue { value: row.id },
                reason: "manual maintenance window".to_string(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert!(resp.success);

        let stored = store.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Rejected);
        assert_eq!(stored.result_message, "manual maintenance window");
    }

    #[tokio::test]
    async fn list_pending_defaults_the_limit_and_orders_oldest_first() {
        let (state, store, _) = service_state();
        let mut older = pending_action();
        older.created_at = Utc::now() - chrono::Duration::seconds(60);
        let newer = pending_action();
        store.create(&newer).await.unwrap();
        store.create(&older).await.unwrap();

        let resp = list_pending_actions(State(state), None).await.unwrap().0;
        assert_eq!(resp.actions.len(), 2);
        assert_eq!(resp.actions[0].id, older.id);
        assert_eq!(resp.actions[0].status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn history_reports_total_count() {
        let (state, store, _) = service_state();
        for _ in 0..3 {
            store.create(&pending_action()).await.unwrap();
        }

        let resp = get_action_history(
            State(state),
            Some(Json(GetActionHistoryRequest { limit: 2 })),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp.actions.len(), 2);
        assert_eq!(resp.total_count, 2);
    }
}
