use std::sync::Arc;
use tcc_types::{now_secs, Participant, TransType, Transaction, TransactionStatus};
use tracing::debug;

use crate::cache::ParticipantCache;
use crate::error::RepositoryError;
use crate::event::RepositoryEvent;
use crate::publisher::EventPublisher;
use crate::store::TransactionStore;

/// Entry point for reading and writing transaction state.
///
/// Business-path writes are queued on the event pipeline and never wait on
/// the store. Participant reads go through the cache, which is also updated
/// inline on enlistment so a transaction's participants can be read back
/// before the create event is persisted. Recovery-path writes are applied to
/// the store directly because the scheduler depends on their result.
#[derive(Clone)]
pub struct TransactionRepository {
    store: Arc<dyn TransactionStore>,
    publisher: Arc<EventPublisher>,
    cache: Arc<ParticipantCache>,
}

impl TransactionRepository {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        publisher: Arc<EventPublisher>,
        cache: Arc<ParticipantCache>,
    ) -> Self {
        Self {
            store,
            publisher,
            cache,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn cache(&self) -> &Arc<ParticipantCache> {
        &self.cache
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BUSINESS PATH
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start a new transaction with a generated id
    pub async fn begin(&self, trans_type: TransType) -> Result<Transaction, RepositoryError> {
        let transaction = Transaction::begin(trans_type, now_secs());
        self.create_transaction(&transaction).await?;
        Ok(transaction)
    }

    pub async fn create_transaction(&self, transaction: &Transaction) -> Result<(), RepositoryError> {
        self.publisher
            .publish(RepositoryEvent::CreateTransaction(transaction.clone()))
            .await?;
        Ok(())
    }

    /// Enlist a participant. Rejects participants without the descriptors
    /// their transaction type needs for recovery.
    pub async fn create_participant(&self, participant: Participant) -> Result<(), RepositoryError> {
        let missing = participant.missing_descriptors();
        if !missing.is_empty() {
            return Err(RepositoryError::InvalidParticipant {
                participant_id: participant.participant_id,
                missing: missing.join(", "),
            });
        }

        self.publisher
            .publish(RepositoryEvent::CreateParticipant(participant.clone()))
            .await?;

        let key = participant.trans_id.clone();
        self.cache.put(&key, participant).await;
        Ok(())
    }

    pub async fn update_status(
        &self,
        trans_id: &str,
        status: TransactionStatus,
    ) -> Result<(), RepositoryError> {
        self.publisher
            .publish(RepositoryEvent::UpdateStatus {
                trans_id: trans_id.to_string(),
                status,
                updated_at: now_secs(),
            })
            .await?;
        Ok(())
    }

    pub async fn update_participant(&self, participant: Participant) -> Result<(), RepositoryError> {
        self.publisher
            .publish(RepositoryEvent::UpdateParticipant(participant.clone()))
            .await?;

        let key = participant.trans_id.clone();
        self.cache.update(&key, participant);
        Ok(())
    }

    pub async fn remove_transaction(&self, trans_id: &str) -> Result<(), RepositoryError> {
        self.publisher
            .publish(RepositoryEvent::RemoveTransaction {
                trans_id: trans_id.to_string(),
            })
            .await?;
        self.cache.invalidate(trans_id);
        Ok(())
    }

    pub async fn remove_participant(
        &self,
        trans_id: &str,
        participant_id: &str,
    ) -> Result<(), RepositoryError> {
        self.publisher
            .publish(RepositoryEvent::RemoveParticipant {
                trans_id: trans_id.to_string(),
                participant_id: participant_id.to_string(),
            })
            .await?;
        self.cache.invalidate(trans_id);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn find_transaction(
        &self,
        trans_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self.store.find_transaction(trans_id).await?)
    }

    /// Participants of a transaction. An empty result may mean the store was
    /// unavailable.
    pub async fn find_participants(&self, trans_id: &str) -> Vec<Participant> {
        self.cache.get(trans_id).await
    }

    /// Participants of a transaction read fresh from the store. The cache
    /// entry is replaced, so a list cached while enlistments were still in
    /// the pipeline does not outlive this call.
    pub async fn reload_participants(&self, trans_id: &str) -> Vec<Participant> {
        self.cache.invalidate(trans_id);
        self.cache.get(trans_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECOVERY PATH
    // ═══════════════════════════════════════════════════════════════════════════

    /// Non-terminal transactions last updated before `threshold`, oldest first
    pub async fn find_overdue(
        &self,
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        Ok(self
            .store
            .find_overdue(&TransactionStatus::NON_TERMINAL, threshold, limit)
            .await?)
    }

    /// Claim `transaction` for one recovery round, bumping its retry count.
    /// Returns false when another instance got there first.
    pub async fn claim_for_recovery(
        &self,
        transaction: &Transaction,
        now: u64,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .store
            .claim_for_recovery(&transaction.trans_id, transaction.retry, now)
            .await?)
    }

    pub async fn persist_status(
        &self,
        trans_id: &str,
        status: TransactionStatus,
        now: u64,
    ) -> Result<(), RepositoryError> {
        self.store.update_status(trans_id, status, now).await?;
        Ok(())
    }

    pub async fn persist_participant(&self, participant: &Participant) -> Result<(), RepositoryError> {
        self.store.update_participant(participant).await?;
        self.cache.update(&participant.trans_id, participant.clone());
        Ok(())
    }

    /// Remove terminal transactions last updated before `threshold`. Goes to
    /// the store directly and drops the matching cache entries afterwards.
    pub async fn remove_expired(
        &self,
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<String>, RepositoryError> {
        let removed = self.store.remove_terminal_before(threshold, limit).await?;
        for trans_id in &removed {
            self.cache.invalidate(trans_id);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "Removed expired transactions");
        }
        Ok(removed)
    }
}
