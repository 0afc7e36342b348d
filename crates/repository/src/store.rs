use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tcc_config::RepositoryConfig;
use tcc_types::{Participant, Transaction, TransactionStatus};
use thiserror::Error;

use crate::serializer::Serializer;

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record ID: {0}")]
    DuplicateId(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("store not initialized: {0}")]
    NotInitialized(String),
}

impl StoreError {
    /// Transient failures that may succeed if the same write is attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::DatabaseError(_) | StoreError::ConnectionError(_)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Persistence contract for transactions and participants.
///
/// Implementations must make every single-record operation atomic. The
/// recovery scheduler relies on [`TransactionStore::claim_for_recovery`] being
/// a compare-and-set so that several coordinator instances can share one
/// backend without compensating the same transaction twice in one round.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Identifier this implementation is registered under
    fn name(&self) -> &'static str;

    /// Bind the codec used for opaque payloads. Must be called before `init`.
    fn set_serializer(&mut self, serializer: Arc<dyn Serializer>);

    /// Open the backend and verify stored data
    async fn init(&mut self, config: &RepositoryConfig) -> Result<(), StoreError>;

    /// Store a new transaction
    async fn create_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Store a new participant
    async fn create_participant(&self, participant: &Participant) -> Result<(), StoreError>;

    /// Set a transaction's status. Fails with `InvalidTransition` when the
    /// stored status is terminal and differs from `status`.
    async fn update_status(
        &self,
        trans_id: &str,
        status: TransactionStatus,
        updated_at: u64,
    ) -> Result<(), StoreError>;

    /// Replace a participant record, subject to the same terminal rule
    async fn update_participant(&self, participant: &Participant) -> Result<(), StoreError>;

    /// Remove a transaction and all of its participants. Removing an absent
    /// transaction is not an error.
    async fn remove_transaction(&self, trans_id: &str) -> Result<(), StoreError>;

    /// Remove one participant. Removing an absent participant is not an error.
    async fn remove_participant(&self, participant_id: &str) -> Result<(), StoreError>;

    async fn find_transaction(&self, trans_id: &str) -> Result<Option<Transaction>, StoreError>;

    /// Participants of a transaction in enlistment order
    async fn find_participants(&self, trans_id: &str) -> Result<Vec<Participant>, StoreError>;

    /// Transactions in one of `statuses` last updated before `threshold`,
    /// oldest first
    async fn find_overdue(
        &self,
        statuses: &[TransactionStatus],
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Atomically increment `retry` and stamp `updated_at = now`, but only if
    /// the stored retry still equals `expected_retry` and the status is
    /// non-terminal. Returns whether this caller won the claim.
    async fn claim_for_recovery(
        &self,
        trans_id: &str,
        expected_retry: u32,
        now: u64,
    ) -> Result<bool, StoreError>;

    /// Remove up to `limit` terminal transactions (and their participants)
    /// last updated before `threshold`, returning the removed ids
    async fn remove_terminal_before(
        &self,
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Release backend resources
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Tables {
    transactions: HashMap<String, Transaction>,
    /// trans_id -> participants in enlistment order
    participants: HashMap<String, Vec<Participant>>,
    /// participant_id -> trans_id
    owners: HashMap<String, String>,
}

impl Tables {
    fn participant_mut(&mut self, participant_id: &str) -> Option<&mut Participant> {
        let trans_id = self.owners.get(participant_id)?;
        self.participants
            .get_mut(trans_id)?
            .iter_mut()
            .find(|p| p.participant_id == participant_id)
    }

    fn drop_transaction(&mut self, trans_id: &str) {
        self.transactions.remove(trans_id);
        if let Some(participants) = self.participants.remove(trans_id) {
            for p in participants {
                self.owners.remove(&p.participant_id);
            }
        }
    }
}

/// Process-local store. Records are held as typed values, so no serializer
/// is involved.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transactions
    pub fn len(&self) -> usize {
        self.tables.read().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().transactions.is_empty()
    }

    /// Number of stored participants across all transactions
    pub fn participant_count(&self) -> usize {
        self.tables.read().owners.len()
    }

    pub fn clear(&self) {
        *self.tables.write() = Tables::default();
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set_serializer(&mut self, _serializer: Arc<dyn Serializer>) {}

    async fn init(&mut self, _config: &RepositoryConfig) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.transactions.contains_key(&transaction.trans_id) {
            return Err(StoreError::DuplicateId(transaction.trans_id.clone()));
        }
        tables
            .transactions
            .insert(transaction.trans_id.clone(), transaction.clone());
        Ok(())
    }

    async fn create_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.owners.contains_key(&participant.participant_id) {
            return Err(StoreError::DuplicateId(participant.participant_id.clone()));
        }
        tables.owners.insert(
            participant.participant_id.clone(),
            participant.trans_id.clone(),
        );
        tables
            .participants
            .entry(participant.trans_id.clone())
            .or_default()
            .push(participant.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        trans_id: &str,
        status: TransactionStatus,
        updated_at: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let transaction = tables
            .transactions
            .get_mut(trans_id)
            .ok_or_else(|| StoreError::NotFound(trans_id.to_string()))?;

        if !transaction.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: trans_id.to_string(),
                from: transaction.status,
                to: status,
            });
        }

        transaction.status = status;
        transaction.updated_at = updated_at;
        Ok(())
    }

    async fn update_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let stored = tables
            .participant_mut(&participant.participant_id)
            .ok_or_else(|| StoreError::NotFound(participant.participant_id.clone()))?;

        if !stored.status.can_transition_to(participant.status) {
            return Err(StoreError::InvalidTransition {
                id: participant.participant_id.clone(),
                from: stored.status,
                to: participant.status,
            });
        }

        // Ownership never changes after enlistment
        let trans_id = std::mem::take(&mut stored.trans_id);
        *stored = participant.clone();
        stored.trans_id = trans_id;
        Ok(())
    }

    async fn remove_transaction(&self, trans_id: &str) -> Result<(), StoreError> {
        self.tables.write().drop_transaction(trans_id);
        Ok(())
    }

    async fn remove_participant(&self, participant_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if let Some(trans_id) = tables.owners.remove(participant_id) {
            if let Some(list) = tables.participants.get_mut(&trans_id) {
                list.retain(|p| p.participant_id != participant_id);
                if list.is_empty() {
                    tables.participants.remove(&trans_id);
                }
            }
        }
        Ok(())
    }

    async fn find_transaction(&self, trans_id: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.tables.read().transactions.get(trans_id).cloned())
    }

    async fn find_participants(&self, trans_id: &str) -> Result<Vec<Participant>, StoreError> {
        Ok(self
            .tables
            .read()
            .participants
            .get(trans_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_overdue(
        &self,
        statuses: &[TransactionStatus],
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.tables.read();
        let mut results: Vec<_> = tables
            .transactions
            .values()
            .filter(|t| statuses.contains(&t.status) && t.updated_at < threshold)
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.trans_id.cmp(&b.trans_id))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn claim_for_recovery(
        &self,
        trans_id: &str,
        expected_retry: u32,
        now: u64,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        match tables.transactions.get_mut(trans_id) {
            Some(t) if t.retry == expected_retry && !t.status.is_terminal() => {
                t.retry += 1;
                t.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_terminal_before(
        &self,
        threshold: u64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut tables = self.tables.write();
        let mut expired: Vec<(u64, String)> = tables
            .transactions
            .values()
            .filter(|t| t.status.is_terminal() && t.updated_at < threshold)
            .map(|t| (t.updated_at, t.trans_id.clone()))
            .collect();
        expired.sort();
        expired.truncate(limit);

        let ids: Vec<String> = expired.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            tables.drop_transaction(id);
        }
        Ok(ids)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
