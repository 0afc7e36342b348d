use tcc_types::{Participant, Transaction, TransactionStatus};

use crate::store::{StoreError, TransactionStore};

/// Broad category of a repository event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    UpdateStatus,
    UpdateParticipant,
    Remove,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::UpdateStatus => "update_status",
            EventKind::UpdateParticipant => "update_participant",
            EventKind::Remove => "remove",
        }
    }
}

/// A state change queued for persistence
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryEvent {
    CreateTransaction(Transaction),
    CreateParticipant(Participant),
    UpdateStatus {
        trans_id: String,
        status: TransactionStatus,
        updated_at: u64,
    },
    UpdateParticipant(Participant),
    RemoveTransaction {
        trans_id: String,
    },
    RemoveParticipant {
        trans_id: String,
        participant_id: String,
    },
}

impl RepositoryEvent {
    /// Owning transaction id. Events are ordered per value of this key.
    pub fn trans_id(&self) -> &str {
        match self {
            RepositoryEvent::CreateTransaction(t) => &t.trans_id,
            RepositoryEvent::CreateParticipant(p) | RepositoryEvent::UpdateParticipant(p) => {
                &p.trans_id
            }
            RepositoryEvent::UpdateStatus { trans_id, .. }
            | RepositoryEvent::RemoveTransaction { trans_id }
            | RepositoryEvent::RemoveParticipant { trans_id, .. } => trans_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            RepositoryEvent::CreateTransaction(_) | RepositoryEvent::CreateParticipant(_) => {
                EventKind::Create
            }
            RepositoryEvent::UpdateStatus { .. } => EventKind::UpdateStatus,
            RepositoryEvent::UpdateParticipant(_) => EventKind::UpdateParticipant,
            RepositoryEvent::RemoveTransaction { .. } | RepositoryEvent::RemoveParticipant { .. } => {
                EventKind::Remove
            }
        }
    }

    /// Apply this event to `store`
    pub async fn apply(&self, store: &dyn TransactionStore) -> Result<(), StoreError> {
        match self {
            RepositoryEvent::CreateTransaction(t) => store.create_transaction(t).await,
            RepositoryEvent::CreateParticipant(p) => store.create_participant(p).await,
            RepositoryEvent::UpdateStatus {
                trans_id,
                status,
                updated_at,
            } => store.update_status(trans_id, *status, *updated_at).await,
            RepositoryEvent::UpdateParticipant(p) => store.update_participant(p).await,
            RepositoryEvent::RemoveTransaction { trans_id } => {
                store.remove_transaction(trans_id).await
            }
            RepositoryEvent::RemoveParticipant { participant_id, .. } => {
                store.remove_participant(participant_id).await
            }
        }
    }
}
