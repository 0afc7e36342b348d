use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcc_config::{OverflowPolicy, PipelineConfig};
use tcc_metrics::MetricsCollector;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::PublishError;
use crate::event::{EventKind, RepositoryEvent};
use crate::retry::RetryPolicy;
use crate::store::{StoreError, TransactionStore};

// ═══════════════════════════════════════════════════════════════════════════
// STATISTICS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    persisted: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
}

/// Snapshot of pipeline activity since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub published: u64,
    pub persisted: u64,
    pub dropped: u64,
    /// Persist attempts repeated after a transient failure
    pub retried: u64,
}

impl PipelineStats {
    /// Events accepted but not yet persisted or dropped
    pub fn pending(&self) -> u64 {
        self.published
            .saturating_sub(self.persisted.saturating_add(self.dropped))
    }
}

/// Outcome of [`EventPublisher::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub persisted: u64,
    /// Dropped after retries or rejected by the store; each one was logged
    pub dropped: u64,
    /// Still buffered when the drain timeout expired
    pub abandoned: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// PUBLISHER
// ═══════════════════════════════════════════════════════════════════════════

/// Asynchronous, sharded event pipeline in front of a [`TransactionStore`].
///
/// Each consumer owns one bounded channel. Events are routed by the hash of
/// their owning transaction id, so all events for one transaction are applied
/// by the same consumer in publish order. There is no ordering across
/// transactions.
pub struct EventPublisher {
    senders: RwLock<Option<Vec<mpsc::Sender<RepositoryEvent>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    overflow_policy: OverflowPolicy,
    publish_timeout: Duration,
    counters: Arc<Counters>,
    metrics: MetricsCollector,
}

impl EventPublisher {
    /// Spawn the consumer pool on the current tokio runtime
    pub fn start(store: Arc<dyn TransactionStore>, config: &PipelineConfig) -> Self {
        let consumers = config.consumer_threads.max(1);
        let shard_capacity = config.shard_capacity();
        let counters = Arc::new(Counters::default());
        let metrics = MetricsCollector::new();
        let retry = RetryPolicy::from_config(config);

        let mut senders = Vec::with_capacity(consumers);
        let mut workers = Vec::with_capacity(consumers);
        for shard in 0..consumers {
            let (sender, receiver) = mpsc::channel(shard_capacity);
            senders.push(sender);

            let consumer = Consumer {
                shard,
                receiver,
                store: store.clone(),
                retry: retry.clone(),
                batch_size: config.batch_size.max(1),
                batch_window: config.batch_window(),
                counters: counters.clone(),
                metrics,
            };
            workers.push(tokio::spawn(consumer.run()));
        }

        info!(
            consumers,
            shard_capacity,
            overflow_policy = ?config.overflow_policy,
            "Event pipeline started"
        );

        Self {
            senders: RwLock::new(Some(senders)),
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            overflow_policy: config.overflow_policy,
            publish_timeout: config.publish_timeout(),
            counters,
            metrics,
        }
    }

    /// Enqueue an event according to the configured overflow policy.
    ///
    /// Never touches the store. Under `Block` a full shard is waited on for at
    /// most the publish timeout.
    pub async fn publish(&self, event: RepositoryEvent) -> Result<(), PublishError> {
        match self.overflow_policy {
            OverflowPolicy::Reject => self.try_publish(event),
            OverflowPolicy::Block => {
                let sender = self.sender_for(&event)?;
                let kind = event.kind();

                match sender.send_timeout(event, self.publish_timeout).await {
                    Ok(()) => {
                        self.accepted(kind);
                        Ok(())
                    }
                    Err(SendTimeoutError::Timeout(event)) => {
                        self.metrics.record_publish_overflow();
                        warn!(
                            trans_id = %event.trans_id(),
                            kind = kind.as_str(),
                            timeout_ms = self.publish_timeout.as_millis() as u64,
                            "Event buffer full, publish timed out"
                        );
                        Err(PublishError::Overflow(self.publish_timeout))
                    }
                    Err(SendTimeoutError::Closed(_)) => Err(PublishError::Closed),
                }
            }
        }
    }

    /// Enqueue without waiting, failing with `Full` if the shard has no room
    pub fn try_publish(&self, event: RepositoryEvent) -> Result<(), PublishError> {
        let sender = self.sender_for(&event)?;
        let kind = event.kind();

        match sender.try_send(event) {
            Ok(()) => {
                self.accepted(kind);
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.metrics.record_publish_overflow();
                warn!(
                    trans_id = %event.trans_id(),
                    kind = kind.as_str(),
                    "Event buffer full, publish rejected"
                );
                Err(PublishError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(PublishError::Closed),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            published: self.counters.published.load(Ordering::SeqCst),
            persisted: self.counters.persisted.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            retried: self.counters.retried.load(Ordering::SeqCst),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting events and flush what is buffered.
    ///
    /// Consumers get at most `drain_timeout` to finish; any still running are
    /// aborted and their unapplied events reported as abandoned. Calling this
    /// more than once is harmless.
    pub async fn shutdown(&self, drain_timeout: Duration) -> DrainReport {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the senders lets each consumer finish once its channel is empty
        drop(self.senders.write().take());
        let workers = std::mem::take(&mut *self.workers.lock());

        let deadline = Instant::now() + drain_timeout;
        let mut aborted = 0usize;
        for mut handle in workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Event consumer task failed"),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }

        let stats = self.stats();
        let report = DrainReport {
            persisted: stats.persisted,
            dropped: stats.dropped,
            abandoned: stats.pending(),
        };

        if report.abandoned > 0 {
            error!(
                abandoned = report.abandoned,
                aborted_consumers = aborted,
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "Drain timed out, buffered events were not persisted"
            );
        }

        info!(
            persisted = report.persisted,
            dropped = report.dropped,
            abandoned = report.abandoned,
            "Event pipeline stopped"
        );

        report
    }

    fn sender_for(
        &self,
        event: &RepositoryEvent,
    ) -> Result<mpsc::Sender<RepositoryEvent>, PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }

        let guard = self.senders.read();
        let senders = guard.as_ref().ok_or(PublishError::Closed)?;
        Ok(senders[shard_index(event.trans_id(), senders.len())].clone())
    }

    fn accepted(&self, kind: EventKind) {
        self.counters.published.fetch_add(1, Ordering::SeqCst);
        self.metrics.record_event_published(kind.as_str());
    }
}

fn shard_index(trans_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    trans_id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

// ═══════════════════════════════════════════════════════════════════════════
// CONSUMER
// ═══════════════════════════════════════════════════════════════════════════

struct Consumer {
    shard: usize,
    receiver: mpsc::Receiver<RepositoryEvent>,
    store: Arc<dyn TransactionStore>,
    retry: RetryPolicy,
    batch_size: usize,
    batch_window: Duration,
    counters: Arc<Counters>,
    metrics: MetricsCollector,
}

impl Consumer {
    async fn run(mut self) {
        let mut batch = Vec::with_capacity(self.batch_size);

        // recv_many returns 0 only once every sender is gone and the channel is empty
        while self.receiver.recv_many(&mut batch, self.batch_size).await > 0 {
            self.fill_batch(&mut batch).await;
            debug!(shard = self.shard, size = batch.len(), "Applying event batch");

            for event in batch.drain(..) {
                self.apply(event).await;
            }
        }

        debug!(shard = self.shard, "Event consumer stopped");
    }

    /// Linger up to the batch window for more events
    async fn fill_batch(&mut self, batch: &mut Vec<RepositoryEvent>) {
        if self.batch_window.is_zero() {
            return;
        }

        let deadline = Instant::now() + self.batch_window;
        while batch.len() < self.batch_size {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(event)) => batch.push(event),
                Ok(None) | Err(_) => break,
            }
        }
    }

    async fn apply(&self, event: RepositoryEvent) {
        let mut attempt = 1;
        loop {
            match event.apply(self.store.as_ref()).await {
                Ok(()) => {
                    self.persisted();
                    return;
                }
                Err(StoreError::DuplicateId(id)) if event.kind() == EventKind::Create => {
                    debug!(shard = self.shard, id = %id, "Create already applied");
                    self.persisted();
                    return;
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        shard = self.shard,
                        trans_id = %event.trans_id(),
                        kind = event.kind().as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Persist failed, retrying"
                    );
                    self.counters.retried.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_persist_retry();

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let reason = if e.is_retryable() { "exhausted" } else { "rejected" };
                    error!(
                        shard = self.shard,
                        trans_id = %event.trans_id(),
                        kind = event.kind().as_str(),
                        attempts = attempt,
                        reason,
                        error = %e,
                        event = ?event,
                        "Dropping event"
                    );
                    self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_event_dropped(reason);
                    return;
                }
            }
        }
    }

    fn persisted(&self) {
        self.counters.persisted.fetch_add(1, Ordering::SeqCst);
        self.metrics.record_event_persisted();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
