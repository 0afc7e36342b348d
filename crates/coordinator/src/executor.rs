use async_trait::async_trait;
use tcc_types::{Compensation, Participant};

use crate::error::InvocationError;

/// Carries confirm/cancel calls to participants.
///
/// Calls may be repeated for the same participant after a crash or timeout,
/// so the receiving side must treat them as idempotent.
#[async_trait]
pub trait InvocationExecutor: Send + Sync {
    async fn invoke_confirm(&self, participant: &Participant) -> Result<(), InvocationError>;

    async fn invoke_cancel(&self, participant: &Participant) -> Result<(), InvocationError>;

    async fn invoke(
        &self,
        compensation: Compensation,
        participant: &Participant,
    ) -> Result<(), InvocationError> {
        match compensation {
            Compensation::Confirm => self.invoke_confirm(participant).await,
            Compensation::Cancel => self.invoke_cancel(participant).await,
        }
    }
}
