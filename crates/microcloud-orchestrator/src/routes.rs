//! Router assembly for the orchestrator HTTP surface.
//!
//! - `/ops.v1.ActionService/*` - action service RPCs
//! - `/api/stream` - SSE stream with 15 s keepalive comments
//! - `/health` - liveness
//!
//! CORS is wide open (`*`) on every endpoint.

use crate::actions::{
    approve_action, get_action_history, list_pending_actions, reject_action, ActionServiceState,
};
use crate::hub::StreamHub;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// GET /api/stream
async fn stream_events(
    State(hub): State<Arc<StreamHub>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client = hub.register();
    let stream = client.map(|frame| Ok(Event::default().data(frame)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    )
}

/// Build the orchestrator router
pub fn router(actions: Arc<ActionServiceState>, hub: Arc<StreamHub>) -> Router {
    let rpc = Router::new()
        .route(
            "/ops.v1.ActionService/ListPendingActions",
            post(list_pending_actions),
        )
        .route("/ops.v1.ActionService/ApproveAction", post(approve_action))
        .route("/ops.v1.ActionService/RejectAction", post(reject_action))
        .route(
            "/ops.v1.ActionService/GetActionHistory",
            post(get_action_history),
        )
        .with_state(actions);

    let stream = Router::new()
        .route("/api/stream", get(stream_events))
        .with_state(hub);

    Router::new()
        .merge(rpc)
        .merge(stream)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use microcloud_bus::{BusDriver, MemoryBus, Publisher, Subscriber};
    use microcloud_storage::MemoryStore;

    #[test]
    fn router_builds() {
        let driver: Arc<dyn BusDriver> = Arc::new(MemoryBus::new());
        let actions = Arc::new(ActionServiceState::new(
            Arc::new(MemoryStore::new()),
            Publisher::new(driver.clone()),
        ));
        let hub = StreamHub::new(Subscriber::new(driver));
        let _router = router(actions, hub);
    }

    #[tokio::test]
    async fn health_returns_ok() {
        assert_eq!(health().await, "ok");
    }
}
