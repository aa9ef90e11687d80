//! Bounded retry with linear backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff unit; the wait after attempt `n` is `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Wait after a failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted. `op` receives the 1-based attempt number.
///
/// Only [`ReviewRelayError::is_transient`](crate::ReviewRelayError::is_transient)
/// errors are retried; rate-limit and hard failures return immediately.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReviewRelayError;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[test]
    fn delay_grows_with_attempt_number() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds_with_increasing_waits() {
        let policy = RetryPolicy::new(3, Duration::from_millis(30));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let seen = stamps.clone();
        let result = retry_transient(&policy, "test", |attempt| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(Instant::now());
                if attempt < 3 {
                    Err(ReviewRelayError::Network("connection reset".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(first_gap >= Duration::from_millis(30));
        assert!(second_gap >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Arc::new(Mutex::new(0u32));

        let counter = calls.clone();
        let result: Result<()> = retry_transient(&policy, "test", |_| {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Err(ReviewRelayError::Network("timed out".into()))
            }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn rate_limit_and_hard_errors_are_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        for err in [
            ReviewRelayError::RateLimited("429".into()),
            ReviewRelayError::Http {
                status: 400,
                message: "bad request".into(),
            },
        ] {
            let calls = Arc::new(Mutex::new(0u32));
            let counter = calls.clone();
            let mut err = Some(err);
            let result: Result<()> = retry_transient(&policy, "test", |_| {
                *counter.lock().unwrap() += 1;
                let e = err.take().expect("called once");
                async move { Err(e) }
            })
            .await;

            assert!(result.is_err());
            assert_eq!(*calls.lock().unwrap(), 1);
        }
    }
}
