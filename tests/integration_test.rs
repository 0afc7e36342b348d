use std::sync::Arc;
use std::time::Duration;
use tcc::config::{AppConfig, PipelineConfig, RecoveryConfig};
use tcc::coordinator::testing::RecordingExecutor;
use tcc::coordinator::{Coordinator, RecoveryScheduler};
use tcc::repository::testing::RecordingStore;
use tcc::repository::{EventPublisher, ParticipantCache, TransactionRepository, TransactionStore};
use tcc::types::{
    now_secs, Compensation, Invocation, Participant, TransType, Transaction, TransactionStatus,
};

// ═══════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════

struct Harness {
    store: Arc<RecordingStore>,
    executor: Arc<RecordingExecutor>,
    repository: TransactionRepository,
    scheduler: RecoveryScheduler,
}

fn harness(recovery: RecoveryConfig) -> Harness {
    let store = Arc::new(RecordingStore::new());
    let executor = Arc::new(RecordingExecutor::new());
    let publisher = Arc::new(EventPublisher::start(
        store.clone(),
        &PipelineConfig {
            consumer_threads: 4,
            buffer_capacity: 256,
            ..Default::default()
        },
    ));
    let cache = Arc::new(ParticipantCache::new(store.clone(), 128));
    let repository = TransactionRepository::new(store.clone(), publisher, cache);
    let scheduler = RecoveryScheduler::new(repository.clone(), executor.clone(), recovery);

    Harness {
        store,
        executor,
        repository,
        scheduler,
    }
}

fn recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        timeout_secs: 60,
        max_retry: 3,
        compensation_timeout_secs: 1,
        cleanup_enabled: false,
        ..Default::default()
    }
}

fn participant(pid: &str, tid: &str) -> Participant {
    Participant::new(pid, tid, TransType::Tcc, now_secs())
        .with_confirm(Invocation::new("inventory", "confirm"))
        .with_cancel(Invocation::new("inventory", "cancel"))
}

/// Wait until every published event has been applied or dropped
async fn settle(repository: &TransactionRepository) {
    for _ in 0..100 {
        if repository.publisher().stats().pending() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pipeline did not settle");
}

// ═══════════════════════════════════════════════════════════════════════════
// PARTICIPANT CACHE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_participants_read_back_in_enlistment_order() {
    let h = harness(recovery_config());
    let tx = h.repository.begin(TransType::Tcc).await.unwrap();

    let pids: Vec<String> = (1..=5).map(|i| format!("p-{i}")).collect();
    for pid in &pids {
        h.repository
            .create_participant(participant(pid, &tx.trans_id))
            .await
            .unwrap();
    }

    let found: Vec<String> = h
        .repository
        .find_participants(&tx.trans_id)
        .await
        .into_iter()
        .map(|p| p.participant_id)
        .collect();
    assert_eq!(found, pids);
}

#[tokio::test]
async fn test_invalidate_triggers_reload() {
    let h = harness(recovery_config());
    h.store
        .inner()
        .create_participant(&participant("p-1", "tx-1"))
        .await
        .unwrap();

    h.repository.find_participants("tx-1").await;
    h.repository.find_participants("tx-1").await;
    assert_eq!(h.store.load_count(), 1);

    h.repository.cache().invalidate("tx-1");
    assert_eq!(h.repository.find_participants("tx-1").await.len(), 1);
    assert_eq!(h.store.load_count(), 2);
}

#[tokio::test]
async fn test_failed_load_reads_empty() {
    let h = harness(recovery_config());
    h.store
        .inner()
        .create_participant(&participant("p-1", "tx-1"))
        .await
        .unwrap();
    h.store.set_fail_loads(true);

    assert!(h.repository.find_participants("tx-1").await.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// EVENT PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_transaction_order_across_consumers() {
    let h = harness(recovery_config());
    let steps = [
        TransactionStatus::Confirming,
        TransactionStatus::Cancelling,
        TransactionStatus::Success,
    ];

    let ids: Vec<String> = (0..16).map(|i| format!("tx-{i}")).collect();
    for id in &ids {
        h.repository
            .create_transaction(&Transaction::new(id.as_str(), TransType::Tcc, 100))
            .await
            .unwrap();
    }
    // Interleave transactions so every consumer has work queued at once
    for status in steps {
        for id in &ids {
            h.repository.update_status(id, status).await.unwrap();
        }
    }

    let report = h.repository.publisher().shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.persisted, 64);

    for id in &ids {
        let applied: Vec<String> = h
            .store
            .writes_for(id)
            .into_iter()
            .map(|w| w.detail)
            .collect();
        assert_eq!(applied, vec!["Begin", "Confirming", "Cancelling", "Success"]);
    }
}

#[tokio::test]
async fn test_shutdown_flushes_published_events() {
    let h = harness(recovery_config());

    for i in 0..100 {
        h.repository
            .create_transaction(&Transaction::new(format!("tx-{i}"), TransType::Tcc, 100))
            .await
            .unwrap();
    }
    let report = h.repository.publisher().shutdown(Duration::from_secs(5)).await;

    assert_eq!(report.persisted, 100);
    assert_eq!(report.dropped + report.abandoned, 0);
    assert_eq!(h.store.inner().len(), 100);
}

// ═══════════════════════════════════════════════════════════════════════════
// RECOVERY
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_overdue_selection_respects_timeout() {
    let h = harness(recovery_config());
    h.store
        .inner()
        .create_transaction(&Transaction::new("stale", TransType::Tcc, 100))
        .await
        .unwrap();
    h.store
        .inner()
        .create_transaction(&Transaction::new("fresh", TransType::Tcc, 950))
        .await
        .unwrap();

    let overdue = h.repository.find_overdue(1000 - 60, 10).await.unwrap();
    let ids: Vec<&str> = overdue.iter().map(|t| t.trans_id.as_str()).collect();
    assert_eq!(ids, vec!["stale"]);
}

#[tokio::test]
async fn test_abandoned_transaction_is_recovered_once() {
    let h = harness(recovery_config());

    let t1 = h.repository.begin(TransType::Tcc).await.unwrap();
    h.repository
        .create_participant(participant("P1", &t1.trans_id))
        .await
        .unwrap();
    settle(&h.repository).await;

    let after_timeout = t1.created_at + 61;
    let report = h.scheduler.run_cycle_at(after_timeout).await.unwrap();
    assert_eq!(report.selected, 1);

    let stored = h.repository.find_transaction(&t1.trans_id).await.unwrap().unwrap();
    assert_eq!(stored.retry, 1);
    // Begin is rolled back
    assert_eq!(h.executor.count(Compensation::Cancel, "P1"), 1);
    assert_eq!(h.executor.total(), 1);
    assert_eq!(stored.status, TransactionStatus::Failure);
}

#[tokio::test]
async fn test_transaction_dies_after_max_retry() {
    let h = harness(RecoveryConfig {
        max_retry: 2,
        ..recovery_config()
    });
    h.executor.set_failing(true);

    let t1 = h.repository.begin(TransType::Tcc).await.unwrap();
    h.repository
        .create_participant(participant("P1", &t1.trans_id))
        .await
        .unwrap();
    settle(&h.repository).await;

    let mut now = t1.created_at;
    for _ in 0..2 {
        now += 61;
        let report = h.scheduler.run_cycle_at(now).await.unwrap();
        assert_eq!(report.pending, 1);
    }

    now += 61;
    let report = h.scheduler.run_cycle_at(now).await.unwrap();
    assert_eq!(report.dead, 1);

    let stored = h.repository.find_transaction(&t1.trans_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Failure);
    assert!(stored.is_dead(2));

    now += 61;
    let report = h.scheduler.run_cycle_at(now).await.unwrap();
    assert_eq!(report.selected, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// FULL STACK
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_restart_recovers_unfinished_work() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.repository.kind = "sqlite".to_string();
    config.repository.url = format!("sqlite://{}", dir.path().join("tcc.db").display());
    config.recovery = RecoveryConfig {
        // Keep the background loop out of the way
        delay_secs: 3600,
        ..recovery_config()
    };

    // First run: a confirm phase is interrupted
    let coordinator = Coordinator::start(config.clone(), Arc::new(RecordingExecutor::new()))
        .await
        .unwrap();
    let repository = coordinator.repository();
    let tx = repository.begin(TransType::Tcc).await.unwrap();
    for pid in ["P1", "P2"] {
        repository
            .create_participant(participant(pid, &tx.trans_id))
            .await
            .unwrap();
    }
    repository
        .update_status(&tx.trans_id, TransactionStatus::Confirming)
        .await
        .unwrap();
    assert!(coordinator.shutdown().await.is_empty());

    // Second run picks it up from disk
    let executor = Arc::new(RecordingExecutor::new());
    let coordinator = Coordinator::start(config, executor.clone()).await.unwrap();
    let report = coordinator
        .scheduler()
        .run_cycle_at(now_secs() + 61)
        .await
        .unwrap();
    assert_eq!(report.recovered, 1);

    assert_eq!(executor.count(Compensation::Confirm, "P1"), 1);
    assert_eq!(executor.count(Compensation::Confirm, "P2"), 1);
    let stored = coordinator
        .repository()
        .find_transaction(&tx.trans_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);

    assert!(coordinator.shutdown().await.is_empty());
}
