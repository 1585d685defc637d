//! Invalidation propagation driver.
//!
//! Deferred invalidations returned by `update_instance` are submitted here as
//! fire-and-forget jobs: "re-derive this entity's cache entry". The worker
//! re-runs the update for each job and resubmits whatever new deferred
//! invalidations that produces, cascading until the graph is exhausted.
//!
//! Submission is at-least-once with no ordering guarantee; processing the
//! same entity twice is harmless because an update is a pure
//! read-compare-write against current state. A job lost to a crash leaves
//! the entry stale until the next write touches it — the system of record
//! stays authoritative either way.
//!
//! There is no cycle detection. Invalidator graphs are expected to be acyclic
//! (children pointing at parents); an invalidator that closes a cycle makes
//! the cascade resubmit forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{DeferredInvalidation, InstanceCache, UpdateMode};
use crate::keys::Pk;

const METRIC_PROPAGATION_MS: &str = "strato_propagation_ms";
const METRIC_PROPAGATION_JOBS: &str = "strato_propagation_jobs_total";

/// One unit of deferred re-derivation work.
///
/// The id and epoch exist for log correlation: the id names the job across
/// retries of the surrounding operation, the epoch orders submissions within
/// this process.
#[derive(Debug, Clone)]
pub struct PropagationJob {
    pub id: Uuid,
    pub epoch: u64,
    pub type_name: String,
    pub pk: Pk,
    /// `None` means every registered version.
    pub version: Option<String>,
    pub mode: UpdateMode,
}

/// Submission handle for propagation jobs. Cheap to clone; hand one to every
/// write path.
#[derive(Clone)]
pub struct PropagationQueue {
    tx: UnboundedSender<PropagationJob>,
    epoch: Arc<AtomicU64>,
}

impl PropagationQueue {
    /// Submit a fresh "entity changed" notification: all versions, full
    /// populate mode. This is the entry point for save/delete hooks.
    pub fn submit(&self, type_name: impl Into<String>, pk: impl Into<Pk>) {
        self.push(PropagationJob {
            id: Uuid::new_v4(),
            epoch: self.next_epoch(),
            type_name: type_name.into(),
            pk: pk.into(),
            version: None,
            mode: UpdateMode::Populate,
        });
    }

    /// Submit one deferred invalidation produced by an update.
    pub fn submit_deferred(&self, deferred: DeferredInvalidation, mode: UpdateMode) {
        self.push(PropagationJob {
            id: Uuid::new_v4(),
            epoch: self.next_epoch(),
            type_name: deferred.type_name,
            pk: deferred.pk,
            version: Some(deferred.version),
            mode,
        });
    }

    /// Submit every deferred invalidation from an `update_instance` result.
    pub fn submit_all(
        &self,
        deferred: impl IntoIterator<Item = DeferredInvalidation>,
        mode: UpdateMode,
    ) {
        for item in deferred {
            self.submit_deferred(item, mode);
        }
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst)
    }

    fn push(&self, job: PropagationJob) {
        info!(
            job_id = %job.id,
            job_epoch = job.epoch,
            type_name = %job.type_name,
            pk = %job.pk,
            version = job.version.as_deref().unwrap_or("*"),
            mode = ?job.mode,
            "propagation job enqueued"
        );
        if self.tx.send(job).is_err() {
            warn!("propagation worker is gone; job dropped");
        }
    }
}

/// Consumer loop for propagation jobs.
///
/// Holds only a weak resubmission handle, so the loop ends once every
/// externally held `PropagationQueue` drops; cascades still in flight at
/// that point are discarded, which the eventual-consistency contract allows.
pub struct PropagationWorker<E> {
    cache: Arc<InstanceCache<E>>,
    resubmit: mpsc::WeakUnboundedSender<PropagationJob>,
    epoch: Arc<AtomicU64>,
    rx: UnboundedReceiver<PropagationJob>,
}

impl<E: Send + Sync + 'static> PropagationWorker<E> {
    /// Create a queue/worker pair over an engine.
    pub fn new(cache: Arc<InstanceCache<E>>) -> (PropagationQueue, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let queue = PropagationQueue {
            tx: tx.clone(),
            epoch: epoch.clone(),
        };
        let worker = Self {
            cache,
            resubmit: tx.downgrade(),
            epoch,
            rx,
        };
        (queue, worker)
    }

    /// Run the consumer loop on the runtime until every queue handle drops.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = self.rx.recv().await {
                self.process(job).await;
            }
        })
    }

    /// Process queued jobs, including the ones enqueued by cascades, until
    /// none remain. Deterministic draining for tests and single-process
    /// embeddings that flush after each write.
    pub async fn run_until_idle(&mut self) {
        while let Ok(job) = self.rx.try_recv() {
            self.process(job).await;
        }
    }

    async fn process(&self, job: PropagationJob) {
        let started_at = Instant::now();
        counter!(METRIC_PROPAGATION_JOBS).increment(1);

        let result = self
            .cache
            .update_instance_with_mode(
                &job.type_name,
                &job.pk,
                None,
                job.version.as_deref(),
                job.mode,
            )
            .await;

        match result {
            Ok(deferred) => {
                let cascade_mode = if self.cache.config().populate_cold {
                    UpdateMode::Populate
                } else {
                    UpdateMode::UpdateOnly
                };
                let cascaded = deferred.len();
                if cascaded > 0 {
                    match self.resubmit.upgrade() {
                        Some(tx) => {
                            let queue = PropagationQueue {
                                tx,
                                epoch: self.epoch.clone(),
                            };
                            queue.submit_all(deferred, cascade_mode);
                        }
                        None => warn!(
                            cascaded,
                            "every queue handle dropped; cascade discarded"
                        ),
                    }
                }
                info!(
                    job_id = %job.id,
                    job_epoch = job.epoch,
                    type_name = %job.type_name,
                    pk = %job.pk,
                    cascaded,
                    "propagation job complete"
                );
            }
            Err(error) => {
                warn!(
                    job_id = %job.id,
                    job_epoch = job.epoch,
                    type_name = %job.type_name,
                    pk = %job.pk,
                    error = %error,
                    "propagation job failed; entry stays stale until the next write"
                );
            }
        }

        histogram!(METRIC_PROPAGATION_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
    }
}
