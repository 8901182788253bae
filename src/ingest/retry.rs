//! Retry with exponential backoff for batch inserts.

use crate::ingest::loader::LoadError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    /// Deterministic part of the delay before retry `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at 30s.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Backoff plus up to 50% random jitter so concurrent batches don't retry in lockstep.
    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter_cap = backoff.as_millis() as u64 / 2;
        if jitter_cap == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
    }
}

/// Run `attempt_fn` until it succeeds, fails with a non-transient error, or the retry
/// budget is spent. The last error is returned on failure.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: F,
) -> Result<T, LoadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LoadError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && e.is_transient() => {
                attempt += 1;
                let delay = policy.delay(attempt);
                log::warn!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {:?}",
                    policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!("{label}: failed permanently after {} attempts: {e}", attempt + 1);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base: Duration::from_millis(200),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(12), MAX_BACKOFF);
        assert_eq!(policy.backoff(64), MAX_BACKOFF);
    }

    #[test]
    fn jitter_stays_within_half_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(100),
        };
        for _ in 0..100 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("batch", &policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LoadError::Database(sqlx::Error::PoolTimedOut))
            } else {
                Ok(42u64)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LoadError> = retry_with_backoff("batch", &policy(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LoadError::Database(sqlx::Error::PoolTimedOut))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LoadError> = retry_with_backoff("batch", &policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LoadError::Database(sqlx::Error::Protocol("bad statement".into())))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
