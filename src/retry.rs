// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded retry with linear backoff and cooperative cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Attempts and base delay for a retried operation.
///
/// The delay before attempt `n + 1` is `delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Chain adapter calls: 3 attempts, 350 ms step.
    pub const CHAIN: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(350),
    };

    /// Upstream price fetches: 3 attempts, 2 s step.
    pub const PRICE_FEED: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(2000),
    };

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(E),
}

/// Run `op` until it succeeds, fails with a non-retryable error, runs out of
/// attempts, or `cancel` fires. Cancellation is checked before each attempt
/// and while waiting between attempts.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            result = op() => result,
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => {
                return Err(RetryError::Failed(e));
            }
            Err(e) => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay_after(attempt)) => {},
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable: {})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result = retry(fast(), &cancel, "flaky", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TestError { retryable: true })
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry(fast(), &cancel, "down", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError { retryable: true })
        })
        .await;

        assert!(matches!(result, Err(RetryError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry(fast(), &cancel, "invalid", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError { retryable: false })
        })
        .await;

        assert!(matches!(result, Err(RetryError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), RetryError<TestError>> =
            retry(fast(), &cancel, "cancelled", || async { Ok(()) }).await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::CHAIN;
        assert_eq!(policy.delay_after(1), Duration::from_millis(350));
        assert_eq!(policy.delay_after(2), Duration::from_millis(700));
    }
}
