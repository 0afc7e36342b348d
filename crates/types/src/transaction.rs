use serde::{Deserialize, Serialize};

use crate::{TransType, TransactionStatus};

/// Persistent record of one distributed transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub trans_id: String,
    pub status: TransactionStatus,
    pub trans_type: TransType,
    pub retry: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Transaction {
    /// Create a new transaction in `Begin` status
    pub fn new(trans_id: impl Into<String>, trans_type: TransType, created_at: u64) -> Self {
        Self {
            trans_id: trans_id.into(),
            status: TransactionStatus::Begin,
            trans_type,
            retry: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Create a transaction with a freshly generated id
    pub fn begin(trans_type: TransType, created_at: u64) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), trans_type, created_at)
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Check if the transaction is non-terminal and has not been touched since `threshold`
    pub fn is_overdue(&self, threshold: u64) -> bool {
        !self.status.is_terminal() && self.updated_at < threshold
    }

    /// A dead transaction exhausted its retry budget and is no longer recovered
    pub fn is_dead(&self, max_retry: u32) -> bool {
        self.status == TransactionStatus::Failure && self.retry > max_retry
    }
}
