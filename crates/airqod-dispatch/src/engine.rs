//! Dispatch engine wiring.
//!
//! Owns the work channel, claim set and cancellation token, and supervises
//! the producer, the consumer pool, the retry scheduler and the schedule
//! runner as one unit with a single graceful-shutdown path.

use std::{sync::Arc, time::Duration};

use airqod_core::{Clock, RecordId, RecordStore, ScheduleStore};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    claims::ClaimSet,
    consumer::ConsumerPool,
    error::Result,
    executor::{DeliveryExecutor, ExecutorConfig},
    producer::DispatchProducer,
    resolver::DestinationResolver,
    retry::{RetryConfig, RetryScheduler},
    schedule::ScheduleRunner,
};

/// Configuration for the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of dispatch consumers.
    pub consumer_count: usize,
    /// Capacity of the bounded work channel.
    pub channel_capacity: usize,
    /// Producer scan cadence when the queue is idle.
    pub scan_interval: Duration,
    /// Maximum records fetched per producer scan.
    pub scan_batch_size: usize,
    /// Schedule runner tick cadence.
    pub schedule_poll_interval: Duration,
    /// HTTP executor settings.
    pub executor: ExecutorConfig,
    /// Retry sweep settings.
    pub retry: RetryConfig,
    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            consumer_count: crate::DEFAULT_CONSUMER_COUNT,
            channel_capacity: crate::DEFAULT_CHANNEL_CAPACITY,
            scan_interval: Duration::from_secs(1),
            scan_batch_size: 64,
            schedule_poll_interval: Duration::from_secs(30),
            executor: ExecutorConfig::default(),
            retry: RetryConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Supervises the whole dispatch pipeline.
pub struct DispatchEngine {
    record_store: Arc<dyn RecordStore>,
    schedule_store: Arc<dyn ScheduleStore>,
    resolver: Arc<DestinationResolver>,
    executor: Arc<DeliveryExecutor>,
    claims: ClaimSet<RecordId>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
    cancellation_token: CancellationToken,
    consumer_pool: Option<ConsumerPool>,
    aux_handles: Vec<JoinHandle<Result<()>>>,
}

impl DispatchEngine {
    /// Creates an engine over the given stores and destinations.
    pub fn new(
        record_store: Arc<dyn RecordStore>,
        schedule_store: Arc<dyn ScheduleStore>,
        resolver: DestinationResolver,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let executor = Arc::new(DeliveryExecutor::new(config.executor.clone())?);

        Ok(Self {
            record_store,
            schedule_store,
            resolver: Arc::new(resolver),
            executor,
            claims: ClaimSet::new(),
            clock,
            config,
            cancellation_token: CancellationToken::new(),
            consumer_pool: None,
            aux_handles: Vec::new(),
        })
    }

    /// The claim set shared with the pipeline, for observability.
    pub fn claims(&self) -> ClaimSet<RecordId> {
        self.claims.clone()
    }

    /// Starts producer, consumers, retry scheduler and schedule runner.
    ///
    /// Returns immediately; use [`DispatchEngine::shutdown`] to stop.
    pub fn start(&mut self) {
        info!(
            consumer_count = self.config.consumer_count,
            channel_capacity = self.config.channel_capacity,
            "starting dispatch engine"
        );

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let pool = ConsumerPool::spawn(
            self.config.consumer_count,
            self.record_store.clone(),
            self.resolver.clone(),
            self.executor.clone(),
            self.claims.clone(),
            rx,
            self.clock.clone(),
            self.cancellation_token.clone(),
        );
        self.consumer_pool = Some(pool);

        let producer = DispatchProducer::new(
            self.record_store.clone(),
            self.claims.clone(),
            tx,
            self.clock.clone(),
            self.cancellation_token.clone(),
            self.config.scan_interval,
            self.config.scan_batch_size,
        );
        self.aux_handles.push(tokio::spawn(async move { producer.run().await }));

        let retry = RetryScheduler::new(
            self.record_store.clone(),
            self.claims.clone(),
            self.clock.clone(),
            self.cancellation_token.clone(),
            self.config.retry.clone(),
        );
        self.aux_handles.push(tokio::spawn(async move { retry.run().await }));

        let runner = ScheduleRunner::new(
            self.schedule_store.clone(),
            self.resolver.clone(),
            self.executor.clone(),
            self.clock.clone(),
            self.cancellation_token.clone(),
            self.config.schedule_poll_interval,
        );
        self.aux_handles.push(tokio::spawn(async move { runner.run().await }));

        info!("dispatch engine started");
    }

    /// Gracefully shuts the pipeline down.
    ///
    /// Signals cancellation, waits for the producer, scheduler and runner
    /// loops to exit, then drains the consumer pool within the configured
    /// timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down dispatch engine");
        self.cancellation_token.cancel();

        for handle in std::mem::take(&mut self.aux_handles) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(error = %error, "pipeline task finished with error"),
                Err(join_error) => warn!(error = %join_error, "pipeline task panicked"),
            }
        }

        if let Some(pool) = self.consumer_pool.take() {
            pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        }

        info!("dispatch engine shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use airqod_core::{
        AuthMethod, DeliveryRecord, MemoryStorage, RealClock, RecordDraft, RecordStatus,
        ServerProfile,
    };
    use chrono::Utc;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            consumer_count: 2,
            scan_interval: Duration::from_millis(10),
            schedule_poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn engine_starts_and_shuts_down_cleanly() {
        let store = Arc::new(MemoryStorage::new());
        let mut engine = DispatchEngine::new(
            store.clone(),
            store,
            DestinationResolver::new(vec![]),
            fast_config(),
            Arc::new(RealClock::new()),
        )
        .unwrap();

        engine.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pending_record_flows_to_succeeded_end_to_end() {
        let destination = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"response":{"id":"sub-7"}}"#),
            )
            .mount(&destination)
            .await;

        let store = Arc::new(MemoryStorage::new());
        let record = DeliveryRecord::from_draft(
            RecordDraft {
                source: "localhost".into(),
                destination: "dhis2".into(),
                content_type: "application/json".into(),
                body: "{}".into(),
                ..Default::default()
            },
            Utc::now(),
        );
        store.insert_record(&record).await.unwrap();

        let resolver = DestinationResolver::new(vec![ServerProfile {
            name: "dhis2".into(),
            base_url: destination.uri(),
            auth: AuthMethod::None,
        }]);
        let mut engine = DispatchEngine::new(
            store.clone(),
            store.clone(),
            resolver,
            fast_config(),
            Arc::new(RealClock::new()),
        )
        .unwrap();
        engine.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = store.find_record(record.id).await.unwrap().unwrap();
                if stored.status == RecordStatus::Succeeded {
                    assert_eq!(stored.submission_id.as_deref(), Some("sub-7"));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("record should be delivered");

        engine.shutdown().await.unwrap();
    }
}
