//! Test doubles for code built on [`InvocationExecutor`]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tcc_types::{Compensation, Participant};

use crate::error::InvocationError;
use crate::executor::InvocationExecutor;

/// Executor that records every call and can be told to fail or stall.
///
/// A call is recorded before the delay, so attempts that time out are
/// still counted.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(Compensation, String)>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor whose calls all fail until [`set_failing`](Self::set_failing) clears it
    pub fn failing() -> Self {
        let executor = Self::default();
        executor.set_failing(true);
        executor
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every call in arrival order as `(action, participant_id)`
    pub fn calls(&self) -> Vec<(Compensation, String)> {
        self.calls.lock().clone()
    }

    pub fn count(&self, compensation: Compensation, participant_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(c, pid)| *c == compensation && pid == participant_id)
            .count()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().len()
    }

    async fn record(
        &self,
        compensation: Compensation,
        participant: &Participant,
    ) -> Result<(), InvocationError> {
        self.calls
            .lock()
            .push((compensation, participant.participant_id.clone()));

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(InvocationError::Failed(format!(
                "injected {compensation} failure"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InvocationExecutor for RecordingExecutor {
    async fn invoke_confirm(&self, participant: &Participant) -> Result<(), InvocationError> {
        self.record(Compensation::Confirm, participant).await
    }

    async fn invoke_cancel(&self, participant: &Participant) -> Result<(), InvocationError> {
        self.record(Compensation::Cancel, participant).await
    }
}
