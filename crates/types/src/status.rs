use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status shared by transactions and participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Try phase in progress
    Begin,

    /// Confirm phase in progress
    Confirming,

    /// Cancel phase in progress
    Cancelling,

    /// Confirmed
    Success,

    /// Cancelled, rolled back, or given up on after exhausting retries
    Failure,
}

impl TransactionStatus {
    /// Statuses a recovery scan is allowed to pick up
    pub const NON_TERMINAL: [TransactionStatus; 3] = [
        TransactionStatus::Begin,
        TransactionStatus::Confirming,
        TransactionStatus::Cancelling,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failure)
    }

    /// Terminal statuses never change; anything else may move to any status.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        !self.is_terminal() || *self == next
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Begin => "Begin",
            TransactionStatus::Confirming => "Confirming",
            TransactionStatus::Cancelling => "Cancelling",
            TransactionStatus::Success => "Success",
            TransactionStatus::Failure => "Failure",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Begin" => Ok(TransactionStatus::Begin),
            "Confirming" => Ok(TransactionStatus::Confirming),
            "Cancelling" => Ok(TransactionStatus::Cancelling),
            "Success" => Ok(TransactionStatus::Success),
            "Failure" => Ok(TransactionStatus::Failure),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

/// Execution style of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransType {
    /// Try-Confirm-Cancel: every participant supplies confirm and cancel calls
    Tcc,

    /// Try-Auto-Cancel: the try phase commits locally, only a cancel call is required
    Tac,
}

impl TransType {
    /// Compensation a recovery run drives for a transaction stuck in `status`.
    ///
    /// Returns `None` for terminal statuses.
    pub fn recovery_action(&self, status: TransactionStatus) -> Option<Compensation> {
        match (self, status) {
            (_, TransactionStatus::Confirming) => Some(Compensation::Confirm),
            // An interrupted try phase is always rolled back
            (_, TransactionStatus::Begin | TransactionStatus::Cancelling) => {
                Some(Compensation::Cancel)
            }
            (_, TransactionStatus::Success | TransactionStatus::Failure) => None,
        }
    }

    /// Whether participants of this type must carry a confirm descriptor
    pub fn requires_confirm(&self) -> bool {
        matches!(self, TransType::Tcc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransType::Tcc => "Tcc",
            TransType::Tac => "Tac",
        }
    }
}

impl fmt::Display for TransType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Tcc" => Ok(TransType::Tcc),
            "Tac" => Ok(TransType::Tac),
            other => Err(ParseError::UnknownTransType(other.to_string())),
        }
    }
}

/// Second-phase action applied to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compensation {
    Confirm,
    Cancel,
}

impl Compensation {
    /// Status recorded while the action is still outstanding
    pub fn in_progress_status(&self) -> TransactionStatus {
        match self {
            Compensation::Confirm => TransactionStatus::Confirming,
            Compensation::Cancel => TransactionStatus::Cancelling,
        }
    }

    /// Status recorded once the action has been applied
    pub fn final_status(&self) -> TransactionStatus {
        match self {
            Compensation::Confirm => TransactionStatus::Success,
            Compensation::Cancel => TransactionStatus::Failure,
        }
    }
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::Confirm => f.write_str("confirm"),
            Compensation::Cancel => f.write_str("cancel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown transaction status: {0}")]
    UnknownStatus(String),

    #[error("unknown transaction type: {0}")]
    UnknownTransType(String),
}
