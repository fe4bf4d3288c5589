//! Retry utilities with exponential backoff.
//!
//! An operation's error type decides what is worth retrying by implementing
//! [`Retryable`]. Anything that does not classify itself as transient fails
//! immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Deadline for each individual attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryConfig {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Transient failure categories that should trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientError {
    /// Network connectivity issues
    Network,
    /// Attempt exceeded its deadline
    Timeout,
    /// Too many requests (429)
    TooManyRequests,
    /// Service unavailable (503)
    ServiceUnavailable,
    /// Gateway timeout (504)
    GatewayTimeout,
    /// Any other server error (5xx)
    ServerError,
}

impl TransientError {
    /// Classify a reqwest error
    pub fn from_reqwest_error(err: &reqwest::Error) -> Option<Self> {
        if err.is_timeout() {
            return Some(TransientError::Timeout);
        }
        if err.is_connect() || err.is_request() {
            return Some(TransientError::Network);
        }
        err.status().and_then(|s| Self::from_status(s.as_u16()))
    }

    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(TransientError::TooManyRequests),
            503 => Some(TransientError::ServiceUnavailable),
            504 => Some(TransientError::GatewayTimeout),
            500..=599 => Some(TransientError::ServerError),
            _ => None,
        }
    }
}

/// Errors that know whether they are worth retrying
pub trait Retryable: Sized {
    /// `Some` when another attempt may succeed
    fn transient(&self) -> Option<TransientError>;

    /// The error to report when an attempt exceeds its deadline
    fn timed_out(after: Duration) -> Self;
}

/// Execute an async operation with retry logic.
///
/// Runs at most `config.max_attempts` times. After failed attempt `n` the
/// delay is `initial_delay * backoff_multiplier^(n-1)`. Errors that are not
/// transient are returned at once; the last error is returned when attempts
/// run out.
pub async fn with_retry<T, E, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        let outcome = match config.attempt_timeout {
            Some(limit) => match timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(limit)),
            },
            None => operation().await,
        };

        let error = match outcome {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} transient failures",
                        attempts,
                        attempts - 1
                    );
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        let Some(transient) = error.transient() else {
            return Err(error);
        };

        if attempts >= max_attempts {
            tracing::warn!("Operation failed after {} attempts: {}", attempts, error);
            return Err(error);
        }

        let delay = config.delay_for(attempts);
        tracing::debug!(
            "Transient error on attempt {}/{}: {:?} ({}), retrying in {:?}",
            attempts,
            max_attempts,
            transient,
            error,
            delay
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Fatal,
        TimedOut,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn transient(&self) -> Option<TransientError> {
            match self {
                TestError::Flaky => Some(TransientError::Network),
                TestError::TimedOut => Some(TransientError::Timeout),
                TestError::Fatal => None,
            }
        }

        fn timed_out(_after: Duration) -> Self {
            TestError::TimedOut
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_try() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<&str, TestError> = {
            let call_count = call_count.clone();
            with_retry(RetryConfig::default(), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Ok("success")
                }
            })
        }
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(*call_count.borrow(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_and_attempt_budget() {
        let started = Instant::now();
        let attempts_at = Rc::new(RefCell::new(Vec::new()));

        let result: Result<(), TestError> = {
            let attempts_at = attempts_at.clone();
            with_retry(RetryConfig::default(), move || {
                let attempts_at = attempts_at.clone();
                async move {
                    attempts_at.borrow_mut().push(started.elapsed());
                    Err(TestError::Flaky)
                }
            })
        }
        .await;

        assert_eq!(result.unwrap_err(), TestError::Flaky);
        assert_eq!(
            *attempts_at.borrow(),
            vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(6)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let call_count = Rc::new(RefCell::new(0));

        let result = {
            let call_count = call_count.clone();
            with_retry(RetryConfig::default(), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    if *call_count.borrow() < 3 {
                        Err(TestError::Flaky)
                    } else {
                        Ok("success")
                    }
                }
            })
        }
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(*call_count.borrow(), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_permanent_error() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<(), TestError> = {
            let call_count = call_count.clone();
            with_retry(RetryConfig::default().max_attempts(5), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Err(TestError::Fatal)
                }
            })
        }
        .await;

        assert_eq!(result.unwrap_err(), TestError::Fatal);
        assert_eq!(*call_count.borrow(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let call_count = Rc::new(RefCell::new(0));
        let config = RetryConfig::default().attempt_timeout(Duration::from_secs(30));

        let result: Result<(), TestError> = {
            let call_count = call_count.clone();
            with_retry(config, move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    std::future::pending::<()>().await;
                    Ok(())
                }
            })
        }
        .await;

        assert_eq!(result.unwrap_err(), TestError::TimedOut);
        assert_eq!(*call_count.borrow(), 3);
    }

    #[test]
    fn test_delay_for() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
        assert_eq!(config.delay_for(3), Duration::from_secs(8));
        assert_eq!(config.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn test_transient_status_detection() {
        assert_eq!(TransientError::from_status(429), Some(TransientError::TooManyRequests));
        assert_eq!(TransientError::from_status(503), Some(TransientError::ServiceUnavailable));
        assert_eq!(TransientError::from_status(500), Some(TransientError::ServerError));
        assert_eq!(TransientError::from_status(404), None);
        assert_eq!(TransientError::from_status(200), None);
    }
}
