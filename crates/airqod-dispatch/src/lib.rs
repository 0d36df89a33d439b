//! Dispatch pipeline for the airqod integrator.
//!
//! Moves persisted delivery records to their destination servers: a
//! producer scans pending records and feeds a bounded work channel, a pool
//! of consumers fans each record out to its primary and carbon-copy
//! servers, a cron-driven retry scheduler re-queues failed work, and a
//! schedule runner executes recurring tasks with per-schedule exclusivity.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod executor;
pub mod producer;
pub mod resolver;
pub mod retry;
pub mod schedule;

pub use claims::ClaimSet;
pub use consumer::{ConsumerPool, DispatchWorker};
pub use engine::{DispatchConfig, DispatchEngine};
pub use error::{DispatchError, Result};
pub use executor::{DeliveryExecutor, ExecutorConfig};
pub use producer::DispatchProducer;
pub use resolver::DestinationResolver;
pub use retry::{RetryConfig, RetryScheduler};
pub use schedule::ScheduleRunner;

/// Default number of dispatch consumers.
pub const DEFAULT_CONSUMER_COUNT: usize = 5;

/// Default capacity of the bounded work channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default cap on delivery attempts per record.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default cron expression for the retry sweep.
pub const DEFAULT_RETRY_CRON: &str = "*/5 * * * *";
