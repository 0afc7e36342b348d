use std::time::Duration;
use tcc_config::ConfigError;
use tcc_repository::{RepositoryError, StoreError};
use thiserror::Error;

/// A confirm or cancel call that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("invocation failed: {0}")]
    Failed(String),

    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("participant {participant_id} has no {action} descriptor")]
    MissingDescriptor {
        participant_id: String,
        action: String,
    },
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<StoreError> for RecoveryError {
    fn from(e: StoreError) -> Self {
        RecoveryError::Repository(e.into())
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("component already registered: {0}")]
    AlreadyRegistered(&'static str),
}

/// Startup failure. Nothing started by the failed attempt is left running.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown repository '{name}', available: {available}")]
    UnknownRepository { name: String, available: String },

    #[error("unknown serializer '{name}', available: {available}")]
    UnknownSerializer { name: String, available: String },

    #[error("store initialization failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
