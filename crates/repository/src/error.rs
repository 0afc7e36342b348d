use thiserror::Error;

use crate::store::StoreError;

/// Why an event was not accepted by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("event buffer full: timed out after {0:?} waiting for space")]
    Overflow(std::time::Duration),

    #[error("event buffer full")]
    Full,

    #[error("event pipeline is shut down")]
    Closed,
}

impl PublishError {
    /// The caller may publish the same event again later
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Closed)
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("participant {participant_id} is missing descriptors: {missing}")]
    InvalidParticipant {
        participant_id: String,
        missing: String,
    },
}

impl RepositoryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Publish(e) => e.is_retryable(),
            RepositoryError::Store(e) => e.is_retryable(),
            RepositoryError::InvalidParticipant { .. } => false,
        }
    }
}
