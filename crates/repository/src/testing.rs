//! Test doubles for code built on [`TransactionStore`]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcc_config::RepositoryConfig;
use tcc_types::{Participant, Transaction, TransactionStatus};

use crate::serializer::Serializer;
use crate::store::{InMemoryStore, StoreError, TransactionStore};

/// One successful write observed by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub op: &'static str,
    /// Transaction id, or participant id for `remove_participant`
    pub key: String,
    pub detail: String,
}

/// In-memory store that records writes in application order, counts
/// participant loads, and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    writes: Mutex<Vec<RecordedWrite>>,
    loads: AtomicUsize,
    fail_loads: AtomicBool,
    failing_writes: AtomicU32,
    write_delay_ms: AtomicU64,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// All successful writes in the order they were applied
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Successful writes whose key is `key`
    pub fn writes_for(&self, key: &str) -> Vec<RecordedWrite> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.key == key)
            .cloned()
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    /// Number of `find_participants` calls, failed ones included
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail with a retryable database error
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Delay every write by `delay`
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::DatabaseError("injected write failure".to_string()));
        }
        Ok(())
    }

    fn record(&self, op: &'static str, key: &str, detail: impl Into<String>) {
        self.writes.lock().push(RecordedWrite {
            op,
            key: key.to_string(),
            detail: detail.into(),
        });
    }
}

#[async_trait]
impl TransactionStore for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn set_serializer(&mut self, serializer: Arc<dyn Serializer>) {
        self.inner.set_serializer(serializer);
    }

    async fn init(&mut self, config: &RepositoryConfig) -> Result<(), StoreError> {
        self.inner.init(config).await
    }

    async fn create_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.before_write().await?;
        self.inner.create_transaction(transaction).await?;
        self.record(
            "create_transaction",
            &transaction.trans_id,
            transaction.status.as_str(),
        );
        Ok(())
    }

    async fn create_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        self.before_write().await?;
        self.inner.create_participant(participant).await?;
        self.record(
            "create_participant",
            &participant.trans_id,
            participant.participant_id.as_str(),
        );
        Ok(())
    }

    async fn update_status(
        &self,
        trans_id: &str,
        status: TransactionStatus,
        updated_at: u64,
    ) -> Result<(), StoreError> {
        self.before_write().await?;
        self.inner.update_status(trans_id, status, updated_at).await?;
        self.record("update_status", trans_id, status.as_str());
        Ok(())
    }

    async fn update_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        self.before_write().await?;
        self.inner.update_participant(participant).await?;
        self.record(
            "update_participant",
            &participant.trans_id,
            format!("{}:{}", participant.participant_id, participant.status),
        );
        Ok(())
    }

    async fn remove_transaction(&self, trans_id: &str) -> Result<(), StoreError> {
        self.before_write().await?;
        self.inner.remove_transaction(trans_id).await?;
        self.record("remove_transaction", trans_id, "");
        Ok(())
    }

    async fn remove_participant(&self, participant_id: &str) -> Result<(), StoreError> {
        self.before_write().await?;
        self.inner.remove_participant(participant_id).await?;
        self.record("remove_participant", participant_id, "");
        Ok(())
    }

    async fn find_transaction(&self, trans_id: &str) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_transaction(trans_id).await
    }

    async fn find_participants(&self, trans_id: &str) -> Result<Vec<Participant>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionError("injected load failure".to_string()));
        }
        self.inner.find_participants(trans_id).await
    }

    async fn find_overdue(
        &self,
        statuses: &[TransactionStatus],
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.inner.find_overdue(statuses, threshold, limit).await
    }

    async fn claim_for_recovery(
        &self,
        trans_id: &str,
        expected_retry: u32,
        now: u64,
    ) -> Result<bool, StoreError> {
        let claimed = self
            .inner
            .claim_for_recovery(trans_id, expected_retry, now)
            .await?;
        if claimed {
            self.record("claim", trans_id, (expected_retry + 1).to_string());
        }
        Ok(claimed)
    }

    async fn remove_terminal_before(
        &self,
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let removed = self.inner.remove_terminal_before(threshold, limit).await?;
        for id in &removed {
            self.record("remove_transaction", id, "expired");
        }
        Ok(removed)
    }
}
