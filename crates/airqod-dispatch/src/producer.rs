//! Dispatch producer.
//!
//! Scans pending records in creation order, gates each on its optional
//! dependency, claims it, marks it in-flight and feeds it to the bounded
//! work channel. Backpressure from the channel naturally throttles the
//! scan when consumers fall behind.

use std::{sync::Arc, time::Duration};

use airqod_core::{Clock, RecordId, RecordStatus, RecordStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    claims::ClaimSet,
    error::{DispatchError, Result},
};

/// Producer half of the dispatch pipeline.
pub struct DispatchProducer {
    store: Arc<dyn RecordStore>,
    claims: ClaimSet<RecordId>,
    tx: mpsc::Sender<RecordId>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    scan_interval: Duration,
    batch_size: usize,
}

impl DispatchProducer {
    /// Creates a producer feeding the given work channel.
    pub fn new(
        store: Arc<dyn RecordStore>,
        claims: ClaimSet<RecordId>,
        tx: mpsc::Sender<RecordId>,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
        scan_interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self { store, claims, tx, clock, cancellation_token, scan_interval, batch_size }
    }

    /// Scan loop, runs until cancelled.
    pub async fn run(&self) -> Result<()> {
        info!("dispatch producer starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.scan_once().await {
                Ok(0) => {
                    tokio::select! {
                        () = self.clock.sleep(self.scan_interval) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                }
                Ok(queued) => {
                    debug!(queued, "queued pending records");
                }
                Err(DispatchError::ChannelClosed) => {
                    // Consumers are gone; nothing left to produce for.
                    warn!("work channel closed, producer stopping");
                    break;
                }
                Err(error) => {
                    error!(error = %error, "producer scan failed");
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                }
            }
        }

        info!("dispatch producer stopped");
        Ok(())
    }

    /// Performs one scan pass, returning how many records were queued.
    pub async fn scan_once(&self) -> Result<usize> {
        let pending = self.store.list_pending(self.batch_size).await?;
        let mut queued = 0;

        for record in pending {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            if self.claims.contains(&record.id) {
                continue;
            }
            if !self.dependency_satisfied(record.depends_on).await? {
                debug!(record_id = %record.id, "dependency not yet satisfied, skipping");
                continue;
            }
            if !self.claims.try_claim(record.id) {
                continue;
            }

            if let Err(error) = self
                .store
                .set_status(record.id, RecordStatus::InFlight, self.clock.now_utc())
                .await
            {
                // Record vanished or became immutable between scan and claim.
                warn!(record_id = %record.id, error = %error, "could not mark record in-flight");
                self.claims.release(&record.id);
                continue;
            }

            if self.tx.send(record.id).await.is_err() {
                self.claims.release(&record.id);
                return Err(DispatchError::ChannelClosed);
            }
            queued += 1;
        }

        Ok(queued)
    }

    /// A record may dispatch when it has no dependency, its dependency has
    /// succeeded, or the dependency no longer exists (cleared
    /// administratively).
    async fn dependency_satisfied(&self, depends_on: Option<RecordId>) -> Result<bool> {
        let Some(dep_id) = depends_on else {
            return Ok(true);
        };
        match self.store.find_record(dep_id).await? {
            Some(dep) => Ok(dep.status == RecordStatus::Succeeded),
            None => Ok(true),
        }
    }
}
