use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tcc_config::RecoveryConfig;
use tcc_metrics::MetricsCollector;
use tcc_repository::TransactionRepository;
use tcc_types::{now_secs, Compensation, Participant, TransType, Transaction, TransactionStatus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{InvocationError, RecoveryError};
use crate::executor::InvocationExecutor;

/// Counts from one recovery scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Overdue transactions returned by the scan
    pub selected: usize,
    pub claimed: usize,
    /// Driven to a terminal status this round
    pub recovered: usize,
    /// Claimed but left for a later round
    pub pending: usize,
    /// Marked dead after exceeding the retry limit
    pub dead: usize,
    /// Claimed by another instance first
    pub skipped: usize,
    /// Store errors while handling a claimed transaction
    pub errors: usize,
    pub compensation_failures: usize,
}

/// Raised when a transaction is given up on. Needs manual intervention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAlert {
    pub trans_id: String,
    pub trans_type: TransType,
    pub retry: u32,
    /// Status the transaction was stuck in before being marked dead
    pub last_status: TransactionStatus,
    pub at: u64,
}

enum Outcome {
    Skipped,
    Dead,
    Recovered,
    Pending { failures: usize },
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

/// Periodically drives stuck transactions to a terminal status.
///
/// Each scan selects non-terminal transactions untouched for longer than the
/// recovery timeout, claims them one by one through an optimistic retry
/// bump, and re-issues the pending confirm or cancel calls to their
/// participants. Several coordinator instances may share a store; the claim
/// guarantees only one of them works on a transaction per round.
pub struct RecoveryScheduler {
    repository: TransactionRepository,
    executor: Arc<dyn InvocationExecutor>,
    config: RecoveryConfig,
    scan_lock: tokio::sync::Mutex<()>,
    alerts: broadcast::Sender<RecoveryAlert>,
    shutdown_tx: broadcast::Sender<()>,
    stopping: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: MetricsCollector,
}

impl RecoveryScheduler {
    pub fn new(
        repository: TransactionRepository,
        executor: Arc<dyn InvocationExecutor>,
        config: RecoveryConfig,
    ) -> Self {
        let (alerts, _) = broadcast::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            repository,
            executor,
            config,
            scan_lock: tokio::sync::Mutex::new(()),
            alerts,
            shutdown_tx,
            stopping: AtomicBool::new(false),
            task: Mutex::new(None),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Receive an alert for every transaction marked dead from now on
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<RecoveryAlert> {
        self.alerts.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Spawn the periodic scan. The first scan runs after `delay_secs`.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Recovery scheduler already started");
            return;
        }

        let shutdown = self.shutdown_tx.subscribe();
        *task = Some(tokio::spawn(self.clone().run_loop(shutdown)));

        info!(
            delay_secs = self.config.delay_secs,
            period_secs = self.config.period_secs,
            timeout_secs = self.config.timeout_secs,
            max_retry = self.config.max_retry,
            "Recovery scheduler started"
        );
    }

    /// Stop scanning. A scan in progress finishes the transaction it is on;
    /// if that takes longer than `grace` the task is aborted.
    ///
    /// Returns false if the task had to be aborted.
    pub async fn stop(&self, grace: Duration) -> bool {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let Some(mut handle) = self.task.lock().take() else {
            return true;
        };

        match timeout(grace, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                handle.abort();
                warn!(grace_ms = grace.as_millis() as u64, "Recovery scheduler aborted");
                false
            }
        }
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let start = tokio::time::Instant::now() + self.config.delay();

        let mut scan = interval_at(start, self.config.period());
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cleanup_period = self.config.cleanup_period().max(Duration::from_secs(1));
        let mut cleanup = interval_at(start + cleanup_period, cleanup_period);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_stopping() {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = scan.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Recovery scan failed");
                    }
                }
                _ = cleanup.tick(), if self.config.cleanup_enabled => {
                    if let Err(e) = self.run_cleanup().await {
                        warn!(error = %e, "Expired transaction cleanup failed");
                    }
                }
            }
        }

        info!("Recovery scheduler stopped");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SCAN
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn run_cycle(&self) -> Result<RecoveryReport, RecoveryError> {
        self.run_cycle_at(now_secs()).await
    }

    /// Run one scan as of `now` (seconds). Scans on one scheduler never overlap.
    pub async fn run_cycle_at(&self, now: u64) -> Result<RecoveryReport, RecoveryError> {
        let _scan = self.scan_lock.lock().await;
        let started = Instant::now();

        let threshold = now.saturating_sub(self.config.timeout_secs);
        let overdue = self
            .repository
            .find_overdue(threshold, self.config.limit)
            .await?;

        let mut report = RecoveryReport {
            selected: overdue.len(),
            ..Default::default()
        };

        for transaction in overdue {
            if self.is_stopping() {
                debug!("Recovery scan interrupted by shutdown");
                break;
            }

            let trans_id = transaction.trans_id.clone();
            match self.recover(transaction, now).await {
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Dead) => {
                    report.claimed += 1;
                    report.dead += 1;
                }
                Ok(Outcome::Recovered) => {
                    report.claimed += 1;
                    report.recovered += 1;
                }
                Ok(Outcome::Pending { failures }) => {
                    report.claimed += 1;
                    report.pending += 1;
                    report.compensation_failures += failures;
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(trans_id = %trans_id, error = %e, "Failed to recover transaction");
                }
            }
        }

        self.metrics.record_recovery_scan(started.elapsed());
        if report.selected > 0 {
            info!(
                selected = report.selected,
                recovered = report.recovered,
                pending = report.pending,
                dead = report.dead,
                skipped = report.skipped,
                "Recovery scan complete"
            );
        }

        Ok(report)
    }

    async fn recover(&self, transaction: Transaction, now: u64) -> Result<Outcome, RecoveryError> {
        if !self.repository.claim_for_recovery(&transaction, now).await? {
            debug!(trans_id = %transaction.trans_id, "Transaction claimed by another instance");
            return Ok(Outcome::Skipped);
        }

        let trans_id = transaction.trans_id.as_str();
        let retry = transaction.retry + 1;

        if retry > self.config.max_retry {
            self.repository
                .persist_status(trans_id, TransactionStatus::Failure, now)
                .await?;
            self.metrics.record_dead_transaction();
            error!(
                trans_id = %trans_id,
                trans_type = %transaction.trans_type,
                retry = retry,
                last_status = %transaction.status,
                "Transaction exceeded max retries, manual intervention required"
            );
            let _ = self.alerts.send(RecoveryAlert {
                trans_id: trans_id.to_string(),
                trans_type: transaction.trans_type,
                retry,
                last_status: transaction.status,
                at: now,
            });
            return Ok(Outcome::Dead);
        }

        // Claims only succeed on non-terminal rows
        let Some(compensation) = transaction.trans_type.recovery_action(transaction.status) else {
            return Ok(Outcome::Skipped);
        };

        if transaction.status != compensation.in_progress_status() {
            self.repository
                .persist_status(trans_id, compensation.in_progress_status(), now)
                .await?;
        }

        // A cached list may predate enlistments that were still queued when it was loaded
        let participants = self.repository.reload_participants(trans_id).await;
        if participants.is_empty() {
            warn!(
                trans_id = %trans_id,
                retry = retry,
                "No participants found, leaving transaction for a later round"
            );
            return Ok(Outcome::Pending { failures: 0 });
        }

        let results = join_all(
            participants
                .iter()
                .filter(|p| !p.status.is_terminal())
                .map(|p| self.compensate(p, compensation, now)),
        )
        .await;
        let failures = results.iter().filter(|ok| !**ok).count();

        if failures > 0 {
            warn!(
                trans_id = %trans_id,
                action = %compensation,
                failures = failures,
                retry = retry,
                "Compensation incomplete"
            );
            return Ok(Outcome::Pending { failures });
        }

        self.repository
            .persist_status(trans_id, compensation.final_status(), now)
            .await?;
        info!(
            trans_id = %trans_id,
            action = %compensation,
            participants = participants.len(),
            retry = retry,
            "Transaction recovered"
        );
        Ok(Outcome::Recovered)
    }

    /// Apply `compensation` to one participant and persist the outcome.
    /// Returns true once the participant reached its final status.
    async fn compensate(
        &self,
        participant: &Participant,
        compensation: Compensation,
        now: u64,
    ) -> bool {
        let result = if participant.trans_type == TransType::Tac
            && compensation == Compensation::Confirm
            && participant.confirm.is_none()
        {
            // TAC try phases commit locally
            Ok(())
        } else {
            let limit = self.config.compensation_timeout();
            match timeout(limit, self.executor.invoke(compensation, participant)).await {
                Ok(result) => result,
                Err(_) => Err(InvocationError::Timeout(limit)),
            }
        };

        let action = compensation.to_string();
        self.metrics.record_compensation(&action, result.is_ok());

        let mut updated = participant.clone();
        updated.updated_at = now;
        let done = match result {
            Ok(()) => {
                updated.status = compensation.final_status();
                true
            }
            Err(e) => {
                updated.status = compensation.in_progress_status();
                updated.retry += 1;
                warn!(
                    trans_id = %participant.trans_id,
                    participant_id = %participant.participant_id,
                    action = %action,
                    retry = updated.retry,
                    error = %e,
                    "Participant compensation failed"
                );
                false
            }
        };

        if let Err(e) = self.repository.persist_participant(&updated).await {
            warn!(
                participant_id = %participant.participant_id,
                error = %e,
                "Failed to persist participant state"
            );
            return false;
        }
        done
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLEANUP
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn run_cleanup(&self) -> Result<usize, RecoveryError> {
        self.run_cleanup_at(now_secs()).await
    }

    /// Remove terminal transactions older than the retention window
    pub async fn run_cleanup_at(&self, now: u64) -> Result<usize, RecoveryError> {
        let threshold = now.saturating_sub(self.config.retention_secs);
        let removed = self
            .repository
            .remove_expired(threshold, self.config.limit)
            .await?;

        self.metrics.record_transactions_cleaned(removed.len());
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed expired transactions");
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingExecutor;
    use tcc_config::PipelineConfig;
    use tcc_repository::testing::RecordingStore;
    use tcc_repository::{EventPublisher, ParticipantCache, TransactionStore};
    use tcc_types::Invocation;

    fn recovery_config() -> RecoveryConfig {
        RecoveryConfig {
            delay_secs: 0,
            period_secs: 1,
            timeout_secs: 60,
            max_retry: 3,
            limit: 100,
            compensation_timeout_secs: 1,
            cleanup_enabled: false,
            ..Default::default()
        }
    }

    fn scheduler(
        store: Arc<RecordingStore>,
        executor: Arc<RecordingExecutor>,
        config: RecoveryConfig,
    ) -> RecoveryScheduler {
        let publisher = Arc::new(EventPublisher::start(
            store.clone(),
            &PipelineConfig {
                consumer_threads: 1,
                buffer_capacity: 16,
                ..Default::default()
            },
        ));
        let cache = Arc::new(ParticipantCache::new(store.clone(), 16));
        let repository = TransactionRepository::new(store, publisher, cache);
        RecoveryScheduler::new(repository, executor, config)
    }

    fn participant(pid: &str, tid: &str) -> Participant {
        Participant::new(pid, tid, TransType::Tcc, 100)
            .with_confirm(Invocation::new("svc", "confirm"))
            .with_cancel(Invocation::new("svc", "cancel"))
    }

    async fn seed(store: &RecordingStore, transaction: Transaction, pids: &[&str]) {
        let tid = transaction.trans_id.clone();
        store.inner().create_transaction(&transaction).await.unwrap();
        for pid in pids {
            store
                .inner()
                .create_participant(&participant(pid, &tid))
                .await
                .unwrap();
        }
    }

    async fn stored(store: &RecordingStore, tid: &str) -> Transaction {
        store.inner().find_transaction(tid).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_begin_is_cancelled() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &["p-1", "p-2"]).await;
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        let report = scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.recovered, 1);

        assert_eq!(executor.count(Compensation::Cancel, "p-1"), 1);
        assert_eq!(executor.count(Compensation::Cancel, "p-2"), 1);
        assert_eq!(executor.count(Compensation::Confirm, "p-1"), 0);

        let tx = stored(&store, "tx-1").await;
        assert_eq!(tx.status, TransactionStatus::Failure);
        assert_eq!(tx.retry, 1);

        let participants = store.inner().find_participants("tx-1").await.unwrap();
        assert!(participants
            .iter()
            .all(|p| p.status == TransactionStatus::Failure));
    }

    #[tokio::test]
    async fn test_confirming_is_confirmed() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(
            &store,
            Transaction::new("tx-1", TransType::Tcc, 100).with_status(TransactionStatus::Confirming),
            &["p-1"],
        )
        .await;
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        scheduler.run_cycle_at(1000).await.unwrap();

        assert_eq!(executor.calls(), vec![(Compensation::Confirm, "p-1".to_string())]);
        assert_eq!(stored(&store, "tx-1").await.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_recent_transactions_are_left_alone() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 990), &["p-1"]).await;
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        let report = scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert_eq!(executor.total(), 0);
        assert_eq!(stored(&store, "tx-1").await.retry, 0);
    }

    #[tokio::test]
    async fn test_failed_compensation_stays_pending() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::failing());
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &["p-1"]).await;
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        let report = scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(report.compensation_failures, 1);

        let tx = stored(&store, "tx-1").await;
        assert_eq!(tx.status, TransactionStatus::Cancelling);
        assert_eq!(tx.retry, 1);

        let p = &store.inner().find_participants("tx-1").await.unwrap()[0];
        assert_eq!(p.status, TransactionStatus::Cancelling);
        assert_eq!(p.retry, 1);

        // Next round succeeds
        executor.set_failing(false);
        let report = scheduler.run_cycle_at(2000).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(stored(&store, "tx-1").await.status, TransactionStatus::Failure);
        assert_eq!(executor.count(Compensation::Cancel, "p-1"), 2);
    }

    #[tokio::test]
    async fn test_only_unfinished_participants_are_retried() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &["p-1"]).await;
        store
            .inner()
            .create_participant(&participant("p-2", "tx-1").with_status(TransactionStatus::Failure))
            .await
            .unwrap();
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(executor.calls(), vec![(Compensation::Cancel, "p-1".to_string())]);
    }

    #[tokio::test]
    async fn test_dead_after_max_retry() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::failing());
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &["p-1"]).await;
        let config = RecoveryConfig {
            max_retry: 2,
            ..recovery_config()
        };
        let scheduler = scheduler(store.clone(), executor.clone(), config);
        let mut alerts = scheduler.subscribe_alerts();

        for now in [1000, 2000] {
            let report = scheduler.run_cycle_at(now).await.unwrap();
            assert_eq!(report.pending, 1);
        }

        let report = scheduler.run_cycle_at(3000).await.unwrap();
        assert_eq!(report.dead, 1);

        let tx = stored(&store, "tx-1").await;
        assert_eq!(tx.status, TransactionStatus::Failure);
        assert_eq!(tx.retry, 3);
        assert!(tx.is_dead(2));

        let alert = alerts.try_recv().unwrap();
        assert_eq!(alert.trans_id, "tx-1");
        assert_eq!(alert.retry, 3);
        assert_eq!(alert.last_status, TransactionStatus::Cancelling);

        // Dead transactions are terminal and never selected again
        let report = scheduler.run_cycle_at(4000).await.unwrap();
        assert_eq!(report.selected, 0);
        assert_eq!(executor.count(Compensation::Cancel, "p-1"), 2);
    }

    #[tokio::test]
    async fn test_missing_participants_never_finalize() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &[]).await;
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        let report = scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(stored(&store, "tx-1").await.status, TransactionStatus::Cancelling);

        // Same when the participant load fails
        seed(&store, Transaction::new("tx-2", TransType::Tcc, 100), &["p-1"]).await;
        store.set_fail_loads(true);
        let report = scheduler.run_cycle_at(2000).await.unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(executor.total(), 0);
    }

    #[tokio::test]
    async fn test_tac_confirm_without_descriptor_is_implicit() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        store
            .inner()
            .create_transaction(
                &Transaction::new("tx-1", TransType::Tac, 100)
                    .with_status(TransactionStatus::Confirming),
            )
            .await
            .unwrap();
        store
            .inner()
            .create_participant(
                &Participant::new("p-1", "tx-1", TransType::Tac, 100)
                    .with_cancel(Invocation::new("svc", "cancel")),
            )
            .await
            .unwrap();
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        let report = scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(executor.total(), 0);
        assert_eq!(stored(&store, "tx-1").await.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_slow_compensation_times_out() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        executor.set_delay(Duration::from_secs(5));
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &["p-1"]).await;
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        let report = scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.compensation_failures, 1);
        assert_eq!(executor.total(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_competing_instances_compensate_once() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        for i in 0..10 {
            let pid = format!("p-{i}");
            seed(
                &store,
                Transaction::new(format!("tx-{i}"), TransType::Tcc, 100),
                &[pid.as_str()],
            )
            .await;
        }
        let a = scheduler(store.clone(), executor.clone(), recovery_config());
        let b = scheduler(store.clone(), executor.clone(), recovery_config());

        let (ra, rb) = tokio::join!(a.run_cycle_at(1000), b.run_cycle_at(1000));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.recovered + rb.recovered, 10);
        assert_eq!(executor.total(), 10);
    }

    #[tokio::test]
    async fn test_scans_on_one_scheduler_do_not_overlap() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        executor.set_delay(Duration::from_millis(200));
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &["p-1", "p-2"]).await;
        let scheduler = scheduler(store.clone(), executor.clone(), recovery_config());

        let (first, second) = tokio::join!(scheduler.run_cycle_at(1000), scheduler.run_cycle_at(1000));
        let (first, second) = (first.unwrap(), second.unwrap());

        // The later scan starts only after the earlier one finished the transaction
        let mut selected = [first.selected, second.selected];
        selected.sort();
        assert_eq!(selected, [0, 1]);
        assert_eq!(first.recovered + second.recovered, 1);
        assert_eq!(first.skipped + second.skipped, 0);
        assert_eq!(executor.count(Compensation::Cancel, "p-1"), 1);
        assert_eq!(executor.count(Compensation::Cancel, "p-2"), 1);
    }

    #[tokio::test]
    async fn test_stale_cached_participants_do_not_finalize_early() {
        let store = Arc::new(RecordingStore::new());
        store
            .inner()
            .create_transaction(&Transaction::new("tx-1", TransType::Tcc, 100))
            .await
            .unwrap();
        store.set_write_delay(Duration::from_millis(200));

        let executor = Arc::new(RecordingExecutor::new());
        let publisher = Arc::new(EventPublisher::start(
            store.clone(),
            &PipelineConfig {
                consumer_threads: 1,
                buffer_capacity: 16,
                ..Default::default()
            },
        ));
        // Room for one transaction only, so enlisting on tx-2 evicts tx-1
        let cache = Arc::new(ParticipantCache::new(store.clone(), 1));
        let repository = TransactionRepository::new(store.clone(), publisher.clone(), cache);
        let scheduler = RecoveryScheduler::new(repository.clone(), executor.clone(), recovery_config());

        repository.create_participant(participant("p-1", "tx-1")).await.unwrap();
        repository.create_participant(participant("p-2", "tx-1")).await.unwrap();
        repository.create_participant(participant("q-1", "tx-2")).await.unwrap();

        // Reload while p-2 is still queued behind the slow store
        tokio::time::sleep(Duration::from_millis(300)).await;
        let early = repository.find_participants("tx-1").await;
        assert!(early.len() < 2);

        let report = publisher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.persisted, 3);
        store.set_write_delay(Duration::ZERO);

        let report = scheduler.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(executor.count(Compensation::Cancel, "p-1"), 1);
        assert_eq!(executor.count(Compensation::Cancel, "p-2"), 1);

        let participants = store.inner().find_participants("tx-1").await.unwrap();
        assert_eq!(participants.len(), 2);
        assert!(participants
            .iter()
            .all(|p| p.status == TransactionStatus::Failure));
        // The refreshed list replaced the stale entry
        assert_eq!(repository.find_participants("tx-1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_terminal_transactions() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(
            &store,
            Transaction::new("tx-old", TransType::Tcc, 100).with_status(TransactionStatus::Success),
            &["p-1"],
        )
        .await;
        seed(
            &store,
            Transaction::new("tx-new", TransType::Tcc, 5000).with_status(TransactionStatus::Success),
            &[],
        )
        .await;
        seed(&store, Transaction::new("tx-open", TransType::Tcc, 100), &[]).await;
        let config = RecoveryConfig {
            retention_secs: 1000,
            ..recovery_config()
        };
        let scheduler = scheduler(store.clone(), executor, config);

        assert_eq!(scheduler.run_cleanup_at(5500).await.unwrap(), 1);
        assert!(store.inner().find_transaction("tx-old").await.unwrap().is_none());
        assert!(store.inner().find_transaction("tx-new").await.unwrap().is_some());
        assert!(store.inner().find_transaction("tx-open").await.unwrap().is_some());
        assert_eq!(store.inner().participant_count(), 0);
    }

    #[tokio::test]
    async fn test_background_loop_runs_and_stops() {
        let store = Arc::new(RecordingStore::new());
        let executor = Arc::new(RecordingExecutor::new());
        seed(&store, Transaction::new("tx-1", TransType::Tcc, 100), &["p-1"]).await;
        let scheduler = Arc::new(scheduler(store.clone(), executor.clone(), recovery_config()));

        scheduler.start();
        assert!(scheduler.is_running());

        for _ in 0..50 {
            if executor.total() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(executor.count(Compensation::Cancel, "p-1"), 1);

        assert!(scheduler.stop(Duration::from_secs(1)).await);
        assert!(!scheduler.is_running());
        // Stopping twice is harmless
        assert!(scheduler.stop(Duration::from_secs(1)).await);
    }
}
