//! Fixed-backoff retry with a wall-clock budget

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Default delay between attempts
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Default budget, measured from the first attempt
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(5 * 60);

/// Retry policy: wait `backoff` between attempts, give up once the next attempt would
/// start after `budget` has elapsed since the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub budget: Duration,
}

impl RetryPolicy {
    pub fn new(backoff: Duration, budget: Duration) -> Self {
        Self { backoff, budget }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BACKOFF, DEFAULT_RETRY_BUDGET)
    }
}

/// Why a retried operation gave up
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed transiently and the budget ran out
    #[error("gave up after {attempts} attempts within {budget:?}: {last}")]
    Exhausted {
        attempts: u32,
        budget: Duration,
        last: E,
    },

    /// A non-transient failure, returned without retrying
    #[error("{0}")]
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The underlying error of the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }
}

/// Run `operation` until it succeeds, fails non-transiently or the budget runs out.
///
/// Uses tokio's clock, so paused-time tests drive the budget deterministically.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    operation_name: &str,
    is_transient: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + policy.budget;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if !is_transient(&e) => {
                debug!(operation = operation_name, error = %e, "Non-transient failure, not retrying");
                return Err(RetryError::Aborted(e));
            }
            Err(e) => {
                if Instant::now() + policy.backoff > deadline {
                    warn!(
                        operation = operation_name,
                        attempts,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts,
                        budget: policy.budget,
                        last: e,
                    });
                }
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    error = %e,
                    "Attempt failed, retrying in {:?}",
                    policy.backoff
                );
                sleep(policy.backoff).await;
            }
        }
    }
}
