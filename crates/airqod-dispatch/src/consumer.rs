//! Dispatch consumers.
//!
//! Workers pull claimed record IDs off the shared work channel and fan each
//! record out to its primary destination and carbon-copy replicas. Record
//! processing runs in its own task so a panic poisons only that record,
//! never the worker loop. The pool mirrors the producer's cancellation
//! token and supports graceful shutdown with a timeout.

use std::{sync::Arc, time::Duration};

use airqod_core::{
    aggregate_status, Clock, DeliveryRecord, DestinationOutcome, FailureKind, RecordId,
    RecordStore,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    claims::ClaimSet,
    error::{DispatchError, Result},
    executor::{DeliveryExecutor, DeliveryTask},
    resolver::DestinationResolver,
};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<RecordId>>>;

/// A single dispatch consumer.
#[derive(Clone)]
pub struct DispatchWorker {
    id: usize,
    store: Arc<dyn RecordStore>,
    resolver: Arc<DestinationResolver>,
    executor: Arc<DeliveryExecutor>,
    claims: ClaimSet<RecordId>,
    rx: SharedReceiver,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl DispatchWorker {
    /// Creates a worker reading from the shared work channel.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        store: Arc<dyn RecordStore>,
        resolver: Arc<DestinationResolver>,
        executor: Arc<DeliveryExecutor>,
        claims: ClaimSet<RecordId>,
        rx: SharedReceiver,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, store, resolver, executor, claims, rx, clock, cancellation_token }
    }

    /// Worker loop, runs until cancelled or the channel closes.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "dispatch worker starting");

        loop {
            let record_id = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                // recv() is cancel-safe; the receiver lock is released
                // whichever branch wins.
                received = async { self.rx.lock().await.recv().await } => {
                    match received {
                        Some(id) => id,
                        None => break,
                    }
                }
            };

            self.handle(record_id).await;
        }

        info!(worker_id = self.id, "dispatch worker stopped");
        Ok(())
    }

    /// Processes one claimed record, isolating panics, and releases the
    /// claim afterwards.
    pub async fn handle(&self, record_id: RecordId) {
        let task_worker = self.clone();
        let handle = tokio::spawn(async move { task_worker.process_record(record_id).await });

        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                error!(
                    worker_id = self.id,
                    record_id = %record_id,
                    error = %error,
                    "record processing failed"
                );
            }
            Err(join_error) => {
                error!(
                    worker_id = self.id,
                    record_id = %record_id,
                    error = %join_error,
                    "record processing panicked"
                );
                self.record_internal_failure(record_id, &join_error.to_string()).await;
            }
        }

        self.claims.release(&record_id);
    }

    /// Fans a record out to every destination that has not already
    /// accepted it, then persists the merged outcome.
    async fn process_record(&self, record_id: RecordId) -> Result<()> {
        let Some(mut record) = self.store.find_record(record_id).await? else {
            // Cleared administratively while queued.
            debug!(worker_id = self.id, record_id = %record_id, "record gone, nothing to do");
            return Ok(());
        };

        let attempt = record.attempts + 1;
        if self.resolver.resolve(&record.destination).is_none() {
            // The primary is mandatory. Fail fast without touching any
            // replica.
            warn!(
                worker_id = self.id,
                record_id = %record_id,
                destination = %record.destination,
                "no server profile for primary destination"
            );
            record.destination_results.insert(
                record.destination.clone(),
                DestinationOutcome::failed(
                    FailureKind::UnknownDestination,
                    format!("no server profile named {:?}", record.destination),
                ),
            );
        } else {
            for destination in fan_out_targets(&record) {
                if record.destination_succeeded(&destination) {
                    debug!(
                        worker_id = self.id,
                        record_id = %record_id,
                        destination = %destination,
                        "already accepted, skipping"
                    );
                    continue;
                }

                // Replicas are best effort; an unconfigured one is skipped
                // rather than recorded as a failure.
                let Some(profile) = self.resolver.resolve(&destination) else {
                    warn!(
                        worker_id = self.id,
                        record_id = %record_id,
                        destination = %destination,
                        "replica has no server profile, skipping"
                    );
                    continue;
                };

                let outcome = self
                    .executor
                    .deliver(
                        profile,
                        DeliveryTask {
                            record_id,
                            url_suffix: &record.url_suffix,
                            content_type: &record.content_type,
                            body: &record.body,
                            attempt,
                        },
                    )
                    .await;

                record.destination_results.insert(destination, outcome);
            }
        }

        record.attempts = attempt;
        record.status = aggregate_status(&record.destination_results);
        record.submission_id = record
            .destination_results
            .get(&record.destination)
            .and_then(|o| o.submission_id.clone());
        record.updated_at = self.clock.now_utc();

        self.store.update_record(&record).await?;

        info!(
            worker_id = self.id,
            record_id = %record_id,
            status = %record.status,
            attempts = record.attempts,
            "record processed"
        );
        Ok(())
    }

    /// Marks a record failed with an internal outcome after its processing
    /// task panicked. Best effort: storage errors here are only logged.
    async fn record_internal_failure(&self, record_id: RecordId, detail: &str) {
        let record = match self.store.find_record(record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(error) => {
                error!(record_id = %record_id, error = %error, "could not load panicked record");
                return;
            }
        };

        let mut record = record;
        let primary = record.destination.clone();
        if !record.destination_succeeded(&primary) {
            record
                .destination_results
                .insert(primary, DestinationOutcome::failed(FailureKind::Internal, detail));
        }
        record.attempts += 1;
        record.status = aggregate_status(&record.destination_results);
        record.updated_at = self.clock.now_utc();

        if let Err(error) = self.store.update_record(&record).await {
            error!(record_id = %record_id, error = %error, "could not persist panic outcome");
        }
    }
}

/// Primary destination followed by carbon-copy servers, deduplicated and
/// with empty labels dropped.
fn fan_out_targets(record: &DeliveryRecord) -> Vec<String> {
    let mut targets = vec![record.destination.clone()];
    for cc in &record.cc_servers {
        if !cc.is_empty() && !targets.contains(cc) {
            targets.push(cc.clone());
        }
    }
    targets
}

/// Supervises a set of dispatch workers.
pub struct ConsumerPool {
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl ConsumerPool {
    /// Spawns `count` workers sharing one work channel receiver.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        count: usize,
        store: Arc<dyn RecordStore>,
        resolver: Arc<DestinationResolver>,
        executor: Arc<DeliveryExecutor>,
        claims: ClaimSet<RecordId>,
        rx: mpsc::Receiver<RecordId>,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        info!(worker_count = count, "spawning dispatch workers");
        let rx = Arc::new(Mutex::new(rx));

        let worker_handles = (0..count)
            .map(|worker_id| {
                let worker = DispatchWorker::new(
                    worker_id,
                    store.clone(),
                    resolver.clone(),
                    executor.clone(),
                    claims.clone(),
                    rx.clone(),
                    clock.clone(),
                    cancellation_token.clone(),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        Self { cancellation_token, worker_handles }
    }

    /// Signals cancellation and waits for workers to drain, up to
    /// `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating dispatch worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let drain = async {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker finished with error");
                    }
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked");
                        first_panic.get_or_insert(DispatchError::WorkerPanic {
                            worker_id,
                            error: join_error.to_string(),
                        });
                    }
                }
            }
            first_panic
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(None) => {
                info!("dispatch worker shutdown completed");
                Ok(())
            }
            Ok(Some(panic)) => Err(panic),
            Err(_) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DispatchError::ShutdownTimeout { timeout })
            }
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for ConsumerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            error!(
                active_workers = active,
                "ConsumerPool dropped with active workers, forcing cancellation"
            );
            self.cancellation_token.cancel();
        }
    }
}
