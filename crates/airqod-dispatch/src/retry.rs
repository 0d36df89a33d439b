//! Cron-driven retry scheduler.
//!
//! On every cron fire, failed and partially-failed records that still have
//! attempts left and have aged past the backoff window are reset to
//! pending. The dispatch producer then picks them up again; consumers skip
//! destinations that already accepted the payload, so a retry only touches
//! the destinations that failed.
//!
//! The sweep also recovers orphans: a record stuck in-flight with no live
//! claim was abandoned by a crash or unclean shutdown, and goes back to
//! pending the same way.

use std::{sync::Arc, time::Duration};

use airqod_core::{cron, Clock, RecordId, RecordStatus, RecordStore};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{claims::ClaimSet, error::Result};

/// Retry sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Cron expression driving the sweep.
    pub cron_expr: String,
    /// Cap on delivery attempts per record.
    pub max_attempts: u32,
    /// Minimum age of the last attempt before a record is retried.
    pub min_age: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            cron_expr: crate::DEFAULT_RETRY_CRON.to_string(),
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            min_age: Duration::ZERO,
        }
    }
}

/// Periodically re-queues retryable records.
pub struct RetryScheduler {
    store: Arc<dyn RecordStore>,
    claims: ClaimSet<RecordId>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    config: RetryConfig,
}

impl RetryScheduler {
    /// Creates a scheduler over the given store.
    pub fn new(
        store: Arc<dyn RecordStore>,
        claims: ClaimSet<RecordId>,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
        config: RetryConfig,
    ) -> Self {
        Self { store, claims, clock, cancellation_token, config }
    }

    /// Cron loop, runs until cancelled.
    ///
    /// The cron expression is validated up front so a bad configuration
    /// fails at startup instead of silently never firing.
    pub async fn run(&self) -> Result<()> {
        cron::parse(&self.config.cron_expr)?;
        info!(cron = %self.config.cron_expr, "retry scheduler starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let now = self.clock.now_utc();
            let next = cron::next_fire_time(&self.config.cron_expr, now)?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next_fire = %next, "retry sweep scheduled");

            tokio::select! {
                () = self.clock.sleep(wait) => {}
                () = self.cancellation_token.cancelled() => break,
            }

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(requeued) => info!(requeued, "retry sweep re-queued records"),
                Err(error) => error!(error = %error, "retry sweep failed"),
            }
        }

        info!("retry scheduler stopped");
        Ok(())
    }

    /// Performs one sweep, returning how many records were reset to
    /// pending.
    pub async fn sweep_once(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let cutoff = now
            - chrono::Duration::from_std(self.config.min_age)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let retryable = self.store.list_retryable(cutoff, self.config.max_attempts).await?;

        let mut requeued = 0;
        for record in retryable {
            // A claimed record is already somewhere in the pipeline.
            if self.claims.contains(&record.id) {
                continue;
            }
            // Rejections repeat identically, so only transient failures
            // earn another pass.
            if !record.has_retryable_failure() {
                continue;
            }
            match self.store.set_status(record.id, RecordStatus::Pending, now).await {
                Ok(()) => requeued += 1,
                Err(error) => {
                    warn!(record_id = %record.id, error = %error, "could not re-queue record");
                }
            }
        }

        for record in self.store.list_stale_in_flight(cutoff).await? {
            // A live claim means a worker still owns it; without one the
            // in-flight state is an orphan from a crash or shutdown.
            if self.claims.contains(&record.id) {
                continue;
            }
            match self.store.set_status(record.id, RecordStatus::Pending, now).await {
                Ok(()) => {
                    info!(record_id = %record.id, "recovered orphaned in-flight record");
                    requeued += 1;
                }
                Err(error) => {
                    warn!(record_id = %record.id, error = %error, "could not recover record");
                }
            }
        }

        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use airqod_core::{
        DeliveryRecord, DestinationOutcome, FailureKind, MemoryStorage, RecordDraft, TestClock,
    };
    use chrono::Utc;

    use super::*;

    fn failed_record(attempts: u32, status: RecordStatus) -> DeliveryRecord {
        let mut record = DeliveryRecord::from_draft(
            RecordDraft {
                source: "localhost".into(),
                destination: "dhis2".into(),
                content_type: "application/json".into(),
                body: "{}".into(),
                ..Default::default()
            },
            Utc::now() - chrono::Duration::minutes(30),
        );
        record.status = status;
        record.attempts = attempts;
        record.updated_at = Utc::now() - chrono::Duration::minutes(30);
        record
            .destination_results
            .insert("dhis2".into(), DestinationOutcome::failed(FailureKind::Network, "down"));
        record
    }

    fn scheduler(store: Arc<MemoryStorage>, claims: ClaimSet<RecordId>) -> RetryScheduler {
        RetryScheduler::new(
            store,
            claims,
            Arc::new(TestClock::new()),
            CancellationToken::new(),
            RetryConfig::default(),
        )
    }

    #[tokio::test]
    async fn sweep_resets_failed_records_to_pending() {
        let store = Arc::new(MemoryStorage::new());
        let failed = failed_record(1, RecordStatus::Failed);
        let partial = failed_record(2, RecordStatus::PartiallyFailed);
        store.insert_record(&failed).await.unwrap();
        store.insert_record(&partial).await.unwrap();

        let requeued = scheduler(store.clone(), ClaimSet::new()).sweep_once().await.unwrap();
        assert_eq!(requeued, 2);

        for id in [failed.id, partial.id] {
            let stored = store.find_record(id).await.unwrap().unwrap();
            assert_eq!(stored.status, RecordStatus::Pending);
        }
    }

    #[tokio::test]
    async fn exhausted_records_stay_failed() {
        let store = Arc::new(MemoryStorage::new());
        let exhausted = failed_record(crate::DEFAULT_MAX_ATTEMPTS, RecordStatus::Failed);
        store.insert_record(&exhausted).await.unwrap();

        let requeued = scheduler(store.clone(), ClaimSet::new()).sweep_once().await.unwrap();
        assert_eq!(requeued, 0);

        let stored = store.find_record(exhausted.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn succeeded_records_are_never_touched() {
        let store = Arc::new(MemoryStorage::new());
        let mut delivered = failed_record(1, RecordStatus::Succeeded);
        delivered
            .destination_results
            .insert("dhis2".into(), DestinationOutcome::ok(200, Some("sub-1".into())));
        store.insert_record(&delivered).await.unwrap();

        let requeued = scheduler(store.clone(), ClaimSet::new()).sweep_once().await.unwrap();
        assert_eq!(requeued, 0);

        let stored = store.find_record(delivered.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Succeeded);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn rejected_records_are_not_requeued() {
        let store = Arc::new(MemoryStorage::new());
        let mut rejected = failed_record(1, RecordStatus::Failed);
        rejected
            .destination_results
            .insert("dhis2".into(), DestinationOutcome::failed(FailureKind::Rejected, "bad"));
        store.insert_record(&rejected).await.unwrap();

        let requeued = scheduler(store.clone(), ClaimSet::new()).sweep_once().await.unwrap();
        assert_eq!(requeued, 0);
    }

    #[tokio::test]
    async fn claimed_records_are_left_alone() {
        let store = Arc::new(MemoryStorage::new());
        let claims = ClaimSet::new();
        let failed = failed_record(1, RecordStatus::Failed);
        store.insert_record(&failed).await.unwrap();
        claims.try_claim(failed.id);

        let requeued = scheduler(store.clone(), claims).sweep_once().await.unwrap();
        assert_eq!(requeued, 0);
    }

    #[tokio::test]
    async fn orphaned_in_flight_records_are_recovered() {
        let store = Arc::new(MemoryStorage::new());
        let orphan = failed_record(1, RecordStatus::InFlight);
        store.insert_record(&orphan).await.unwrap();

        // Fresh claim set, as after a restart.
        let requeued = scheduler(store.clone(), ClaimSet::new()).sweep_once().await.unwrap();
        assert_eq!(requeued, 1);

        let stored = store.find_record(orphan.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn claimed_in_flight_records_are_left_alone() {
        let store = Arc::new(MemoryStorage::new());
        let claims = ClaimSet::new();
        let active = failed_record(1, RecordStatus::InFlight);
        store.insert_record(&active).await.unwrap();
        claims.try_claim(active.id);

        let requeued = scheduler(store.clone(), claims).sweep_once().await.unwrap();
        assert_eq!(requeued, 0);

        let stored = store.find_record(active.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::InFlight);
    }

    #[tokio::test]
    async fn run_rejects_an_invalid_cron_expression() {
        let scheduler = RetryScheduler::new(
            Arc::new(MemoryStorage::new()),
            ClaimSet::new(),
            Arc::new(TestClock::new()),
            CancellationToken::new(),
            RetryConfig { cron_expr: "bogus".into(), ..Default::default() },
        );
        assert!(scheduler.run().await.is_err());
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let scheduler = RetryScheduler::new(
            Arc::new(MemoryStorage::new()),
            ClaimSet::new(),
            Arc::new(TestClock::new()),
            token,
            RetryConfig::default(),
        );
        scheduler.run().await.unwrap();
    }
}
