//! Retry logic with exponential backoff, jitter and per-attempt timeouts.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::data_source::{SourceError, SourceErrorKind};

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(4),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_ms = (seconds.min(max.as_secs_f64()) * 1_000.0).round() as u64;

                if !jitter {
                    return Duration::from_millis(capped_ms);
                }

                let spread = capped_ms / 2;
                let offset = fastrand::u64(0..=spread * 2);
                Duration::from_millis((capped_ms + offset).saturating_sub(spread))
            }
        }
    }
}

/// Retry policy for one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total calls allowed, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Error kinds that earn another attempt.
    pub retry_on: Vec<SourceErrorKind>,
    /// Hard deadline for the first attempt.
    pub attempt_timeout: Duration,
    /// Added to the deadline for each subsequent attempt.
    pub timeout_step: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            retry_on: vec![SourceErrorKind::Timeout, SourceErrorKind::Upstream],
            attempt_timeout: Duration::from_secs(10),
            timeout_step: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with the default retryable kinds.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn should_retry(&self, error: &SourceError) -> bool {
        self.retry_on.contains(&error.kind())
    }

    /// Deadline for attempt number `attempt` (0-based).
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        self.attempt_timeout
            .saturating_add(self.timeout_step.saturating_mul(attempt))
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Terminal error of a retried operation with the number of calls made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub error: SourceError,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error or runs out
/// of attempts. Each attempt is bounded by its own timeout; expiry counts as
/// a `Timeout` error.
///
/// On success returns the value and the number of calls made.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    mut op: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let deadline = config.timeout_for_attempt(attempt);
        let result = match tokio::time::timeout(deadline, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::timeout(format!(
                "attempt exceeded {}ms deadline",
                deadline.as_millis()
            ))),
        };
        let attempts = attempt + 1;

        match result {
            Ok(value) => return Ok((value, attempts)),
            Err(error) if attempts < max_attempts && config.should_retry(&error) => {
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt = attempts;
            }
            Err(error) => return Err(RetryFailure { error, attempts }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(3), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff_with_jitter() {
        let backoff = Backoff::default();

        for _ in 0..10 {
            for attempt in 0..4 {
                let delay_ms = backoff.delay(attempt).as_millis() as f64;
                let expected = (500.0 * 2_f64.powi(attempt as i32)).min(4_000.0);

                assert!(delay_ms >= expected * 0.5, "attempt={attempt}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected * 1.5, "attempt={attempt}, delay_ms={delay_ms}");
            }
        }
    }

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();

        assert_eq!(config.max_attempts, 3);
        assert!(config.should_retry(&SourceError::timeout("t")));
        assert!(config.should_retry(&SourceError::upstream("502")));
        assert!(!config.should_retry(&SourceError::not_found("x")));
        assert!(!config.should_retry(&SourceError::unauthenticated("x")));
        assert!(!config.should_retry(&SourceError::rate_limited("x")));
        assert_eq!(config.timeout_for_attempt(0), Duration::from_secs(10));
        assert_eq!(config.timeout_for_attempt(2), Duration::from_secs(14));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_exhausted() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::fixed(Duration::ZERO, 3);

        let failure = with_retry(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(SourceError::timeout("slow")) }
        })
        .await
        .expect_err("must exhaust");

        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error.kind(), SourceErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_stop_after_one_call() {
        let config = RetryConfig::fixed(Duration::ZERO, 3);

        let failure = with_retry(&config, |_| async {
            Err::<(), _>(SourceError::not_found("unknown symbol"))
        })
        .await
        .expect_err("must fail");

        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let config = RetryConfig::fixed(Duration::ZERO, 3);

        let (value, attempts) = with_retry(&config, |attempt| async move {
            if attempt == 0 {
                Err(SourceError::upstream("503"))
            } else {
                Ok(attempt)
            }
        })
        .await
        .expect("second attempt succeeds");

        assert_eq!(value, 1);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn attempt_deadline_maps_to_timeout() {
        let config = RetryConfig::no_retry().with_attempt_timeout(Duration::from_millis(10));

        let failure = with_retry(&config, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .expect_err("must time out");

        assert_eq!(failure.error.kind(), SourceErrorKind::Timeout);
        assert_eq!(failure.attempts, 1);
    }
}
