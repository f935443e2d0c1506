use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Failure classes shared by download and navigation call sites. The retry
/// policy only cares about one bit: retryable or not.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeouts, connection resets, rate-limit responses. Rate limiting gets
    /// no special escalation; it backs off like any other transient failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Artifact below the minimum-size threshold; treated as a failed,
    /// retryable download rather than accepted as truncated data.
    #[error("artifact too small: {size} bytes (minimum {min})")]
    TooSmall { size: u64, min: u64 },

    /// Anti-automation challenge not cleared within the polling ceiling.
    #[error("challenge not cleared: {0}")]
    ChallengeBlocked(String),

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl FetchError {
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::TooSmall { .. })
    }
}

/// Fixed attempt budget with exponential backoff, `base * 2^(attempt-1)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `op` until it succeeds, fails non-retryably, or the attempt budget
    /// runs out. The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt < self.max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; backing off {:.1}s",
                        what,
                        attempt,
                        self.max_attempts,
                        err,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = Cell::new(0u32);
        let result = policy()
            .run("op", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(FetchError::Transient("429".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = policy()
            .run("op", |_| {
                calls.set(calls.get() + 1);
                async { Err(FetchError::TooSmall { size: 12, min: 100 }) }
            })
            .await;
        assert_eq!(calls.get(), 3);
        assert!(matches!(result, Err(FetchError::TooSmall { .. })));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = policy()
            .run("op", |_| {
                calls.set(calls.get() + 1);
                async { Err(FetchError::Fatal(anyhow::anyhow!("browser gone"))) }
            })
            .await;
        assert_eq!(calls.get(), 1);
        assert!(result.is_err());
    }
}
