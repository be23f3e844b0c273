//! Bounded retry with a fixed delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use databox_backend::BackendError;
use databox_client::ClientError;
use thiserror::Error;
use tracing::{debug, warn};

/// Classifies an error as worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        !self.is_not_found()
    }
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport { .. } | ClientError::Status { .. } | ClientError::Rejected(_)
        )
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(e) => e,
        }
    }
}

/// At most `max_attempts` tries, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `attempt` (given the 1-based attempt number) until it succeeds,
    /// fails fatally, or the budget is spent.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max = self.max_attempts.max(1);
        let mut n = 1;
        loop {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(RetryError::Fatal(e)),
                Err(e) if n >= max => {
                    warn!(%what, attempts = n, error = %e, "giving up");
                    return Err(RetryError::Exhausted {
                        attempts: n,
                        last: e,
                    });
                }
                Err(e) => {
                    debug!(%what, attempt = n, error = %e, "retrying");
                    tokio::time::sleep(self.delay).await;
                    n += 1;
                }
            }
        }
    }
}
