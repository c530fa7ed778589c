//! Bounded retry with linear backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::{AgoraError, ErrorCategory};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff step; attempt `n` sleeps `n * backoff`.
    pub backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            ..Self::default()
        }
    }

    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt).min(self.max_backoff)
    }

    /// Execute an async operation, retrying only on `Conflict`.
    pub async fn on_conflict<F, Fut, T>(&self, operation: F) -> Result<T, AgoraError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgoraError>>,
    {
        self.execute_when(|e| e.category() == ErrorCategory::Conflict, operation)
            .await
    }

    async fn execute_when<P, F, Fut, T>(
        &self,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, AgoraError>
    where
        P: Fn(&AgoraError) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgoraError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !should_retry(&e) || attempt >= max_attempts {
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Retrying after error"
                    );

                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
