//! In-memory storage for tests and standalone deployments.
//!
//! Backs both stores with tokio `RwLock`-protected maps. Semantics mirror
//! the Postgres implementation, including the succeeded-records-are-
//! immutable guard, so pipeline tests exercise the same contract the
//! production store enforces.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    models::{DeliveryRecord, QueueDepth, RecordId, RecordStatus, Schedule, ScheduleId},
    store::{RecordFilter, RecordStore, ScheduleStore},
};

/// Shared in-memory record and schedule store.
///
/// Cloning is cheap; clones observe the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<HashMap<RecordId, DeliveryRecord>>>,
    schedules: Arc<RwLock<HashMap<ScheduleId, Schedule>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, for test assertions.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

fn guard_mutable(existing: &DeliveryRecord) -> Result<()> {
    if existing.status == RecordStatus::Succeeded {
        return Err(CoreError::ConstraintViolation(format!(
            "record {} already succeeded and is immutable",
            existing.id
        )));
    }
    Ok(())
}

fn matches_filter(record: &DeliveryRecord, filter: &RecordFilter) -> bool {
    if filter.status.is_some_and(|s| s != record.status) {
        return false;
    }
    if filter.district.as_deref().is_some_and(|d| d != record.district) {
        return false;
    }
    if filter.facility.as_deref().is_some_and(|f| f != record.facility) {
        return false;
    }
    if filter.batch_id.as_deref().is_some_and(|b| Some(b) != record.batch_id.as_deref()) {
        return false;
    }
    if filter.destination.as_deref().is_some_and(|d| d != record.destination) {
        return false;
    }
    true
}

#[async_trait]
impl RecordStore for MemoryStorage {
    async fn insert_record(&self, record: &DeliveryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_record(&self, id: RecordId) -> Result<Option<DeliveryRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<DeliveryRecord>> {
        let records = self.records.read().await;
        let mut matched: Vec<DeliveryRecord> =
            records.values().filter(|r| matches_filter(r, filter)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let records = self.records.read().await;
        let mut pending: Vec<DeliveryRecord> = records
            .values()
            .filter(|r| r.status == RecordStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn list_retryable(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<DeliveryRecord>> {
        let records = self.records.read().await;
        let mut retryable: Vec<DeliveryRecord> = records
            .values()
            .filter(|r| {
                r.status.is_retryable() && r.attempts < max_attempts && r.updated_at <= cutoff
            })
            .cloned()
            .collect();
        retryable.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(retryable)
    }

    async fn list_stale_in_flight(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryRecord>> {
        let records = self.records.read().await;
        let mut stale: Vec<DeliveryRecord> = records
            .values()
            .filter(|r| r.status == RecordStatus::InFlight && r.updated_at <= cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(stale)
    }

    async fn update_record(&self, record: &DeliveryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get(&record.id) {
            Some(existing) => {
                guard_mutable(existing)?;
                records.insert(record.id, record.clone());
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("record {} not found", record.id))),
        }
    }

    async fn set_status(
        &self,
        id: RecordId,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(existing) => {
                guard_mutable(existing)?;
                existing.status = status;
                existing.updated_at = now;
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("record {id} not found"))),
        }
    }

    async fn delete_record(&self, id: RecordId) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn delete_by_batch(&self, batch_id: &str) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.batch_id.as_deref() != Some(batch_id));
        Ok((before - records.len()) as u64)
    }

    async fn delete_by_district(&self, district: &str) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.district != district);
        Ok((before - records.len()) as u64)
    }

    async fn queue_depth(&self) -> Result<QueueDepth> {
        let records = self.records.read().await;
        let mut depth = QueueDepth::default();
        for record in records.values() {
            match record.status {
                RecordStatus::Pending => depth.pending += 1,
                RecordStatus::InFlight => depth.in_flight += 1,
                RecordStatus::Succeeded => depth.succeeded += 1,
                RecordStatus::Failed => depth.failed += 1,
                RecordStatus::PartiallyFailed => depth.partially_failed += 1,
            }
        }
        Ok(depth)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStorage {
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        if schedules.contains_key(&schedule.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "schedule {} already exists",
                schedule.id
            )));
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn find_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        let mut all: Vec<Schedule> = schedules.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        match schedules.get(&schedule.id) {
            Some(_) => {
                schedules.insert(schedule.id, schedule.clone());
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("schedule {} not found", schedule.id))),
        }
    }

    async fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        self.schedules.write().await.remove(&id);
        Ok(())
    }

    async fn try_mark_running(&self, id: ScheduleId) -> Result<bool> {
        let mut schedules = self.schedules.write().await;
        match schedules.get_mut(&id) {
            Some(schedule) if !schedule.is_running => {
                schedule.is_running = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_finished(&self, id: ScheduleId, finished_at: DateTime<Utc>) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        match schedules.get_mut(&id) {
            Some(schedule) => {
                schedule.is_running = false;
                schedule.last_run_at = Some(finished_at);
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("schedule {id} not found"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::{DestinationOutcome, RecordDraft, ScheduleDraft};

    fn draft(district: &str, batch: Option<&str>) -> RecordDraft {
        RecordDraft {
            source: "localhost".into(),
            destination: "dhis2".into(),
            content_type: "application/json".into(),
            body: "{}".into(),
            district: district.into(),
            batch_id: batch.map(Into::into),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pending_records_come_back_in_creation_order() {
        let store = MemoryStorage::new();
        let base = Utc::now();

        let older = DeliveryRecord::from_draft(draft("d1", None), base - Duration::minutes(2));
        let newer = DeliveryRecord::from_draft(draft("d1", None), base);
        store.insert_record(&newer).await.unwrap();
        store.insert_record(&older).await.unwrap();

        let pending = store.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, older.id);
        assert_eq!(pending[1].id, newer.id);
    }

    #[tokio::test]
    async fn succeeded_records_reject_mutation() {
        let store = MemoryStorage::new();
        let now = Utc::now();
        let mut record = DeliveryRecord::from_draft(draft("d1", None), now);
        record.status = RecordStatus::Succeeded;
        record
            .destination_results
            .insert("dhis2".into(), DestinationOutcome::ok(200, Some("sub-1".into())));
        store.insert_record(&record).await.unwrap();

        let err = store.set_status(record.id, RecordStatus::Pending, now).await.unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation(_)));

        let mut mutated = record.clone();
        mutated.body = "tampered".into();
        assert!(store.update_record(&mutated).await.is_err());
    }

    #[tokio::test]
    async fn retryable_listing_honors_cutoff_and_attempt_cap() {
        let store = MemoryStorage::new();
        let now = Utc::now();

        let mut stale_failed = DeliveryRecord::from_draft(draft("d1", None), now);
        stale_failed.status = RecordStatus::Failed;
        stale_failed.attempts = 2;
        stale_failed.updated_at = now - Duration::minutes(10);

        let mut fresh_failed = DeliveryRecord::from_draft(draft("d1", None), now);
        fresh_failed.status = RecordStatus::Failed;
        fresh_failed.attempts = 1;
        fresh_failed.updated_at = now;

        let mut exhausted = DeliveryRecord::from_draft(draft("d1", None), now);
        exhausted.status = RecordStatus::PartiallyFailed;
        exhausted.attempts = 5;
        exhausted.updated_at = now - Duration::minutes(10);

        for r in [&stale_failed, &fresh_failed, &exhausted] {
            store.insert_record(r).await.unwrap();
        }

        let retryable = store.list_retryable(now - Duration::minutes(5), 5).await.unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].id, stale_failed.id);
    }

    #[tokio::test]
    async fn batch_and_district_clears_count_deletions() {
        let store = MemoryStorage::new();
        let now = Utc::now();
        store
            .insert_record(&DeliveryRecord::from_draft(draft("kampala", Some("b1")), now))
            .await
            .unwrap();
        store
            .insert_record(&DeliveryRecord::from_draft(draft("kampala", Some("b2")), now))
            .await
            .unwrap();
        store
            .insert_record(&DeliveryRecord::from_draft(draft("wakiso", Some("b1")), now))
            .await
            .unwrap();

        assert_eq!(store.delete_by_batch("b1").await.unwrap(), 2);
        assert_eq!(store.delete_by_district("kampala").await.unwrap(), 1);
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn schedule_exclusivity_flag_flips_once() {
        let store = MemoryStorage::new();
        let now = Utc::now();
        let schedule = Schedule::from_draft(
            ScheduleDraft {
                name: "nightly".into(),
                cron_expr: "0 2 * * *".into(),
                server: "dhis2".into(),
                ..Default::default()
            },
            now,
        );
        store.insert_schedule(&schedule).await.unwrap();

        assert!(store.try_mark_running(schedule.id).await.unwrap());
        assert!(!store.try_mark_running(schedule.id).await.unwrap());

        store.mark_finished(schedule.id, now).await.unwrap();
        let stored = store.find_schedule(schedule.id).await.unwrap().unwrap();
        assert!(!stored.is_running);
        assert_eq!(stored.last_run_at, Some(now));
        assert!(store.try_mark_running(schedule.id).await.unwrap());
    }

    #[tokio::test]
    async fn filters_narrow_record_listing() {
        let store = MemoryStorage::new();
        let now = Utc::now();
        let mut failed = DeliveryRecord::from_draft(draft("kampala", Some("b1")), now);
        failed.status = RecordStatus::Failed;
        store.insert_record(&failed).await.unwrap();
        store
            .insert_record(&DeliveryRecord::from_draft(draft("wakiso", None), now))
            .await
            .unwrap();

        let filter = RecordFilter {
            status: Some(RecordStatus::Failed),
            district: Some("kampala".into()),
            ..Default::default()
        };
        let matched = store.list_records(&filter).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, failed.id);
    }
}
