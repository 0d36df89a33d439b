//! Test infrastructure and fixtures for deterministic testing.
//!
//! Bundles the in-memory storage backend with a controllable clock and
//! provides builders for records, schedules and server profiles so tests
//! read as scenarios rather than struct literals. Everything here runs
//! without external services.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use airqod_core::{
    Clock, DeliveryRecord, MemoryStorage, RecordStore, Schedule, ScheduleStore, TestClock,
};

pub mod fixtures;

pub use fixtures::{basic_profile, profile, token_profile, RecordBuilder, ScheduleBuilder};

/// Test environment with in-memory persistence and deterministic time.
pub struct TestEnv {
    /// Shared storage backend for records and schedules.
    pub storage: Arc<MemoryStorage>,
    /// Deterministic clock; advance it to trigger retry windows.
    pub clock: Arc<TestClock>,
}

impl TestEnv {
    /// Creates a fresh, empty environment.
    pub fn new() -> Self {
        Self { storage: Arc::new(MemoryStorage::new()), clock: Arc::new(TestClock::new()) }
    }

    /// The storage backend as a record store trait object.
    pub fn record_store(&self) -> Arc<dyn RecordStore> {
        self.storage.clone()
    }

    /// The storage backend as a schedule store trait object.
    pub fn schedule_store(&self) -> Arc<dyn ScheduleStore> {
        self.storage.clone()
    }

    /// Builds a record from the builder at the clock's current time and
    /// persists it.
    pub async fn insert_record(&self, builder: RecordBuilder) -> DeliveryRecord {
        let record = builder.build(self.clock.now_utc());
        self.storage.insert_record(&record).await.expect("insert record");
        record
    }

    /// Builds a schedule from the builder at the clock's current time and
    /// persists it.
    pub async fn insert_schedule(&self, builder: ScheduleBuilder) -> Schedule {
        let schedule = builder.build(self.clock.now_utc());
        self.storage.insert_schedule(&schedule).await.expect("insert schedule");
        schedule
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use airqod_core::RecordStatus;

    use super::*;

    #[tokio::test]
    async fn env_round_trips_a_built_record() {
        let env = TestEnv::new();
        let record = env.insert_record(RecordBuilder::with_defaults().district("Kampala")).await;

        let stored = env.storage.find_record(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Pending);
        assert_eq!(stored.district, "Kampala");
        assert_eq!(stored.created_at, env.clock.now_utc());
    }

    #[tokio::test]
    async fn env_round_trips_a_built_schedule() {
        let env = TestEnv::new();
        let schedule =
            env.insert_schedule(ScheduleBuilder::with_defaults().cron("0 3 * * 1")).await;

        let stored = env.storage.find_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.cron_expr, "0 3 * * 1");
        assert!(!stored.is_running);
    }
}
