//! Core domain models and storage layer for the airqod integrator.
//!
//! Provides strongly-typed delivery records and schedules, the error
//! taxonomy, cron evaluation, clock abstraction, and the record/schedule
//! stores (Postgres for production, in-memory for tests and standalone
//! runs). All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cron;
pub mod error;
pub mod models;
pub mod store;
pub mod time;

pub use cron::next_fire_time;
pub use error::{CoreError, Result};
pub use models::{
    aggregate_status, AuthMethod, DeliveryRecord, DestinationOutcome, FailureKind, QueueDepth,
    RecordDraft, RecordId, RecordStatus, Schedule, ScheduleDraft, ScheduleId, ServerProfile,
};
pub use store::{
    memory::MemoryStorage, postgres::PgStorage, RecordFilter, RecordStore, ScheduleStore,
};
pub use time::{Clock, RealClock, TestClock};
