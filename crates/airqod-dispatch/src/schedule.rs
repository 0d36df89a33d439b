//! Recurring schedule runner.
//!
//! Ticks over the stored schedules and fires each one whose cron
//! expression is due. Firing goes through the storage-level
//! `try_mark_running` flag, so a schedule runs at most once at a time even
//! with multiple runner replicas sharing the database.

use std::{sync::Arc, time::Duration};

use airqod_core::{cron, Clock, RecordId, Schedule, ScheduleStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    executor::{DeliveryExecutor, DeliveryTask},
    resolver::DestinationResolver,
};

/// Executes stored schedules when their cron expressions fire.
#[derive(Clone)]
pub struct ScheduleRunner {
    store: Arc<dyn ScheduleStore>,
    resolver: Arc<DestinationResolver>,
    executor: Arc<DeliveryExecutor>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    poll_interval: Duration,
}

impl ScheduleRunner {
    /// Creates a runner over the given schedule store.
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        resolver: Arc<DestinationResolver>,
        executor: Arc<DeliveryExecutor>,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self { store, resolver, executor, clock, cancellation_token, poll_interval }
    }

    /// Tick loop, runs until cancelled.
    pub async fn run(&self) -> Result<()> {
        info!(poll_interval = ?self.poll_interval, "schedule runner starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if let Err(error) = self.tick().await {
                error!(error = %error, "schedule tick failed");
            }

            tokio::select! {
                () = self.clock.sleep(self.poll_interval) => {}
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("schedule runner stopped");
        Ok(())
    }

    /// Fires every due schedule once, returning how many ran.
    ///
    /// Fires run as separate tasks so one slow delivery never delays the
    /// other due schedules; the `try_mark_running` flag keeps each
    /// individual schedule from overlapping itself.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let mut fires = Vec::new();

        for schedule in self.store.list_schedules().await? {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            if !self.is_due(&schedule, now) {
                continue;
            }
            let runner = self.clone();
            fires.push(tokio::spawn(async move { runner.fire(schedule).await }));
        }

        let mut fired = 0;
        for handle in fires {
            match handle.await {
                Ok(Ok(true)) => fired += 1,
                Ok(Ok(false)) => {}
                Ok(Err(error)) => error!(error = %error, "schedule fire failed"),
                Err(join_error) => error!(error = %join_error, "schedule fire panicked"),
            }
        }

        Ok(fired)
    }

    /// A schedule is due when its next fire time after the last run lies
    /// in the past. Invalid cron expressions are logged and skipped so one
    /// broken schedule cannot stall the rest.
    fn is_due(&self, schedule: &Schedule, now: chrono::DateTime<chrono::Utc>) -> bool {
        let reference = schedule.last_run_at.unwrap_or(schedule.created_at);
        match cron::next_fire_time(&schedule.cron_expr, reference) {
            Ok(next) => next <= now,
            Err(error) => {
                warn!(
                    schedule_id = %schedule.id,
                    cron = %schedule.cron_expr,
                    error = %error,
                    "invalid cron expression, skipping schedule"
                );
                false
            }
        }
    }

    /// Runs one schedule under the exclusivity flag. Returns false when
    /// another runner already holds it.
    async fn fire(&self, schedule: Schedule) -> Result<bool> {
        if !self.store.try_mark_running(schedule.id).await? {
            debug!(schedule_id = %schedule.id, "schedule already running, skipping this fire");
            return Ok(false);
        }

        info!(schedule_id = %schedule.id, name = %schedule.name, "running schedule");

        match self.resolver.resolve(&schedule.server) {
            Some(profile) => {
                let outcome = self
                    .executor
                    .deliver(
                        profile,
                        DeliveryTask {
                            // Correlation id for tracing only; schedule runs
                            // are not persisted as delivery records.
                            record_id: RecordId::new(),
                            url_suffix: &schedule.url_suffix,
                            content_type: &schedule.content_type,
                            body: &schedule.body,
                            attempt: 1,
                        },
                    )
                    .await;
                if outcome.success {
                    info!(schedule_id = %schedule.id, "schedule run succeeded");
                } else {
                    warn!(
                        schedule_id = %schedule.id,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "schedule run failed"
                    );
                }
            }
            None => {
                warn!(
                    schedule_id = %schedule.id,
                    server = %schedule.server,
                    "no server profile configured for schedule"
                );
            }
        }

        self.store.mark_finished(schedule.id, self.clock.now_utc()).await?;
        Ok(true)
    }
}
