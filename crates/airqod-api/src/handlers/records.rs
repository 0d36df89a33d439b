//! Delivery queue CRUD handlers.
//!
//! Creating a record only enqueues it; delivery is asynchronous and its
//! progress is visible through the record's status and per-destination
//! outcomes.

use airqod_core::{DeliveryRecord, RecordDraft, RecordFilter, RecordId, RecordStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{error_response, ApiError};
use crate::AppState;

/// Response from successful record creation.
#[derive(Debug, Serialize)]
pub struct CreateRecordResponse {
    /// Identifier of the queued record.
    pub id: RecordId,
    /// Initial lifecycle state, always "pending".
    pub status: String,
}

/// Query parameters accepted by the record listing endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListRecordsQuery {
    /// Lifecycle state filter, e.g. "pending" or "partially_failed".
    pub status: Option<String>,
    /// District filter.
    pub district: Option<String>,
    /// Facility filter.
    pub facility: Option<String>,
    /// Producing batch filter.
    pub batch_id: Option<String>,
    /// Primary destination filter.
    pub destination: Option<String>,
    /// Maximum number of rows returned.
    pub limit: Option<usize>,
}

/// Queues a delivery record.
///
/// The record starts out pending; the dispatch pipeline picks it up on
/// its next scan. There is no synchronous delivery response.
#[instrument(name = "create_record", skip(state, draft), fields(destination = %draft.destination))]
pub async fn create_record(
    State(state): State<AppState>,
    Json(draft): Json<RecordDraft>,
) -> Result<Response, ApiError> {
    if draft.destination.is_empty() {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_input",
            "destination must not be empty",
        ));
    }

    let record = DeliveryRecord::from_draft(draft, state.clock.now_utc());
    state.records.insert_record(&record).await?;

    info!(record_id = %record.id, "record queued");

    let body = CreateRecordResponse { id: record.id, status: record.status.to_string() };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// Lists queued records, newest first, optionally filtered.
#[instrument(name = "list_records", skip(state))]
pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<Response, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => match RecordStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return Ok(error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_input",
                    &format!("unknown status {raw:?}"),
                ))
            }
        },
        None => None,
    };

    let filter = RecordFilter {
        status,
        district: query.district,
        facility: query.facility,
        batch_id: query.batch_id,
        destination: query.destination,
        limit: query.limit,
    };

    let records = state.records.list_records(&filter).await?;
    Ok(Json(records).into_response())
}

/// Fetches a single record with its per-destination outcomes.
#[instrument(name = "get_record", skip(state))]
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.records.find_record(RecordId::from(id)).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok(error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("no record with id {id}"),
        )),
    }
}

/// Deletes a single record.
#[instrument(name = "delete_record", skip(state))]
pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let id = RecordId::from(id);
    if state.records.find_record(id).await?.is_none() {
        return Ok(error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("no record with id {id}"),
        ));
    }

    state.records.delete_record(id).await?;
    info!(record_id = %id, "record deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}
