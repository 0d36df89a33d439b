//! Storage abstraction for delivery records and schedules.
//!
//! Trait-based so the dispatch pipeline and API can run against either
//! PostgreSQL in production or the in-memory store in tests and standalone
//! deployments, without code changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    models::{DeliveryRecord, QueueDepth, RecordId, RecordStatus, Schedule, ScheduleId},
};

pub mod memory;
pub mod postgres;

/// Query filter for listing delivery records on the administrative surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Restrict to a lifecycle state.
    pub status: Option<RecordStatus>,
    /// Restrict to a district.
    pub district: Option<String>,
    /// Restrict to a facility.
    pub facility: Option<String>,
    /// Restrict to a producing batch.
    pub batch_id: Option<String>,
    /// Restrict to a primary destination.
    pub destination: Option<String>,
    /// Maximum number of rows returned.
    pub limit: Option<usize>,
}

/// Persistence operations for delivery records.
///
/// Implementations must keep one invariant: a record in `Succeeded` state
/// is immutable, so updates and status changes against it are rejected
/// with a constraint violation.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Persists a new record.
    async fn insert_record(&self, record: &DeliveryRecord) -> Result<()>;

    /// Looks up a record by ID.
    async fn find_record(&self, id: RecordId) -> Result<Option<DeliveryRecord>>;

    /// Lists records matching a filter, newest first.
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<DeliveryRecord>>;

    /// Lists pending records in creation order, oldest first.
    ///
    /// The dispatch producer scans this; dependency and claim checks
    /// happen in the pipeline, not here.
    async fn list_pending(&self, limit: usize) -> Result<Vec<DeliveryRecord>>;

    /// Lists failed and partially-failed records whose last mutation is at
    /// or before `cutoff` and that have attempts remaining.
    async fn list_retryable(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<DeliveryRecord>>;

    /// Lists in-flight records whose last mutation is at or before
    /// `cutoff`.
    ///
    /// An in-flight row nobody holds a claim on is an orphan left behind
    /// by a crash or unclean shutdown; the retry sweep resets those to
    /// pending.
    async fn list_stale_in_flight(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryRecord>>;

    /// Replaces a record's mutable fields (status, outcomes, attempts,
    /// submission id, timestamps).
    async fn update_record(&self, record: &DeliveryRecord) -> Result<()>;

    /// Transitions a record's status.
    async fn set_status(&self, id: RecordId, status: RecordStatus, now: DateTime<Utc>)
        -> Result<()>;

    /// Deletes a record. Missing IDs are a no-op.
    async fn delete_record(&self, id: RecordId) -> Result<()>;

    /// Deletes every record produced by a batch, returning the count.
    async fn delete_by_batch(&self, batch_id: &str) -> Result<u64>;

    /// Deletes every record belonging to a district, returning the count.
    async fn delete_by_district(&self, district: &str) -> Result<u64>;

    /// Per-status record counts.
    async fn queue_depth(&self) -> Result<QueueDepth>;
}

/// Persistence operations for recurring schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync + 'static {
    /// Persists a new schedule.
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Looks up a schedule by ID.
    async fn find_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>>;

    /// Lists all schedules.
    async fn list_schedules(&self) -> Result<Vec<Schedule>>;

    /// Replaces a schedule's definition fields.
    async fn update_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Deletes a schedule. Missing IDs are a no-op.
    async fn delete_schedule(&self, id: ScheduleId) -> Result<()>;

    /// Atomically flips `is_running` from false to true.
    ///
    /// Returns false when the schedule is already running (or missing),
    /// in which case the caller must skip this fire. This is the
    /// per-schedule mutual exclusion primitive.
    async fn try_mark_running(&self, id: ScheduleId) -> Result<bool>;

    /// Clears `is_running` and stamps the completion time.
    async fn mark_finished(&self, id: ScheduleId, finished_at: DateTime<Utc>) -> Result<()>;
}
