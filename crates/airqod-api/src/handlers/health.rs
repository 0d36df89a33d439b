//! Liveness probe.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, instrument};

use crate::AppState;

/// Liveness check endpoint.
///
/// A minimal check that does not touch external dependencies; it only
/// confirms the HTTP server is responding.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    debug!("performing liveness check");

    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "airqod-api",
    });

    (StatusCode::OK, Json(response)).into_response()
}
