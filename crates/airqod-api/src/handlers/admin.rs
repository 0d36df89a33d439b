//! Asynchronous clears and queue statistics.
//!
//! Clears acknowledge immediately with a correlation token and run in
//! the background; a worker holding one of the cleared records simply
//! finds it gone and drops it.

use airqod_core::QueueDepth;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::ApiError;
use crate::AppState;

/// Acknowledgment for an asynchronous clear.
#[derive(Debug, Serialize)]
pub struct ClearAccepted {
    /// Correlation token for log lookup; the clear itself is
    /// fire-and-forget.
    pub task_id: Uuid,
    /// Always "accepted".
    pub status: String,
}

impl ClearAccepted {
    fn new(task_id: Uuid) -> Self {
        Self { task_id, status: "accepted".to_string() }
    }
}

/// Deletes every record produced by a batch, asynchronously.
#[instrument(name = "clear_batch", skip(state))]
pub async fn clear_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Response {
    let task_id = Uuid::new_v4();
    let records = state.records.clone();

    info!(%task_id, batch_id = %batch_id, "batch clear accepted");
    tokio::spawn(async move {
        match records.delete_by_batch(&batch_id).await {
            Ok(deleted) => info!(%task_id, batch_id = %batch_id, deleted, "batch clear finished"),
            Err(e) => error!(%task_id, batch_id = %batch_id, error = %e, "batch clear failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(ClearAccepted::new(task_id))).into_response()
}

/// Deletes every record belonging to a district, asynchronously.
#[instrument(name = "clear_district", skip(state))]
pub async fn clear_district(
    State(state): State<AppState>,
    Path(district): Path<String>,
) -> Response {
    let task_id = Uuid::new_v4();
    let records = state.records.clone();

    info!(%task_id, district = %district, "district clear accepted");
    tokio::spawn(async move {
        match records.delete_by_district(&district).await {
            Ok(deleted) => {
                info!(%task_id, district = %district, deleted, "district clear finished");
            }
            Err(e) => error!(%task_id, district = %district, error = %e, "district clear failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(ClearAccepted::new(task_id))).into_response()
}

/// Reports queue depth per lifecycle state.
#[instrument(name = "stats", skip(state))]
pub async fn stats(State(state): State<AppState>) -> Result<Json<QueueDepth>, ApiError> {
    let depth = state.records.queue_depth().await?;
    Ok(Json(depth))
}
