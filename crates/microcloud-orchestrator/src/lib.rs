//! # Microcloud Orchestrator
//!
//! Human approval surface and real-time fan-out.
//!
//! This crate provides:
//! - The action service RPCs (`/ops.v1.ActionService/*`): list, approve,
//!   reject, history
//! - The [`StreamHub`](hub::StreamHub): fans `sim.metrics`, `ops.incidents`
//!   and `ops.actions` to SSE subscribers with slow-consumer protection
//! - Router assembly with CORS and the health endpoint

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod actions;
pub mod hub;
pub mod routes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use microcloud_core::Error;
use serde::{Deserialize, Serialize};

/// Error body returned by the RPC handlers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// RPC error mapped onto protocol status codes
#[derive(Debug, PartialEq, Eq)]
pub enum ApiError {
    /// 400
    InvalidArgument(String),
    /// 404
    NotFound(String),
    /// 409
    FailedPrecondition(String),
    /// 500
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(msg) => Self::NotFound(msg),
            Error::InvalidArgument(msg) => Self::InvalidArgument(msg),
            Error::FailedPrecondition(msg) => Self::FailedPrecondition(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::FailedPrecondition(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Re-export commonly used items
pub mod prelude {
    pub use crate::actions::ActionServiceState;
    pub use crate::hub::StreamHub;
    pub use crate::routes::router;
    pub use crate::{ApiError, ErrorResponse};
}
