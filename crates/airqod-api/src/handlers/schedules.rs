//! Schedule CRUD handlers.
//!
//! The runtime fields (`is_running`, `last_run_at`) belong to the
//! schedule runner; updates through this surface only touch the
//! definition.

use airqod_core::{Schedule, ScheduleDraft, ScheduleId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{error_response, ApiError};
use crate::AppState;

/// Response from successful schedule creation.
#[derive(Debug, Serialize)]
pub struct CreateScheduleResponse {
    /// Identifier of the schedule.
    pub id: ScheduleId,
}

fn validate_draft(draft: &ScheduleDraft) -> Option<Response> {
    if draft.server.is_empty() {
        return Some(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_input",
            "server must not be empty",
        ));
    }

    if let Err(error) = airqod_core::cron::parse(&draft.cron_expr) {
        return Some(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_cron",
            &error.to_string(),
        ));
    }

    None
}

/// Creates a schedule. The cron expression is validated up front so a
/// bad definition never reaches the runner.
#[instrument(name = "create_schedule", skip(state, draft), fields(name = %draft.name))]
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(draft): Json<ScheduleDraft>,
) -> Result<Response, ApiError> {
    if let Some(rejection) = validate_draft(&draft) {
        return Ok(rejection);
    }

    let schedule = Schedule::from_draft(draft, state.clock.now_utc());
    state.schedules.insert_schedule(&schedule).await?;

    info!(schedule_id = %schedule.id, name = %schedule.name, "schedule created");

    Ok((StatusCode::CREATED, Json(CreateScheduleResponse { id: schedule.id })).into_response())
}

/// Lists all schedules.
#[instrument(name = "list_schedules", skip(state))]
pub async fn list_schedules(State(state): State<AppState>) -> Result<Response, ApiError> {
    let schedules = state.schedules.list_schedules().await?;
    Ok(Json(schedules).into_response())
}

/// Fetches a single schedule.
#[instrument(name = "get_schedule", skip(state))]
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.schedules.find_schedule(ScheduleId::from(id)).await? {
        Some(schedule) => Ok(Json(schedule).into_response()),
        None => Ok(error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("no schedule with id {id}"),
        )),
    }
}

/// Replaces a schedule's definition, preserving its identity and run
/// state.
#[instrument(name = "update_schedule", skip(state, draft))]
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(draft): Json<ScheduleDraft>,
) -> Result<Response, ApiError> {
    if let Some(rejection) = validate_draft(&draft) {
        return Ok(rejection);
    }

    let id = ScheduleId::from(id);
    let Some(existing) = state.schedules.find_schedule(id).await? else {
        return Ok(error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("no schedule with id {id}"),
        ));
    };

    let updated = Schedule {
        id: existing.id,
        name: draft.name,
        cron_expr: draft.cron_expr,
        server: draft.server,
        url_suffix: draft.url_suffix,
        content_type: draft.content_type,
        body: draft.body,
        is_running: existing.is_running,
        last_run_at: existing.last_run_at,
        created_at: existing.created_at,
    };
    state.schedules.update_schedule(&updated).await?;

    info!(schedule_id = %id, "schedule updated");
    Ok(Json(updated).into_response())
}

/// Deletes a schedule.
#[instrument(name = "delete_schedule", skip(state))]
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let id = ScheduleId::from(id);
    if state.schedules.find_schedule(id).await?.is_none() {
        return Ok(error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("no schedule with id {id}"),
        ));
    }

    state.schedules.delete_schedule(id).await?;
    info!(schedule_id = %id, "schedule deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}
