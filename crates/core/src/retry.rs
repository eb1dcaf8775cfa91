//! Exponential-backoff retry policy for failure-prone remote calls.
//!
//! [`RetryPolicy::run`] executes an async operation, retrying failures
//! that [`Classify`] as [`ErrorClass::Transient`] after
//! `base_delay * 2^(attempt - 1)` plus a random jitter in
//! `[0, base_delay)`. Permanent failures and the final exhausted
//! failure are returned unchanged.
//!
//! The policy holds no per-call state, so one instance can be shared by
//! every stage and used re-entrantly (e.g. a poller whose status query
//! goes through the same policy as the stage that wraps it).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Implemented by every error type that passes through [`RetryPolicy`].
///
/// Classification is explicit per variant; nothing is inferred from the
/// type of the error.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Classify an HTTP status code returned by a remote service.
///
/// 408, 429 and every 5xx are transient; all other non-success codes
/// (bad request, unauthenticated, forbidden, not found, ...) are permanent.
pub fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        408 | 429 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

/// Classify a transport-level [`reqwest::Error`].
///
/// Timeouts, connection failures and interrupted bodies are transient;
/// an undecodable response body or an invalid request is permanent.
/// Errors carrying a status code defer to [`classify_http_status`].
pub fn classify_request_error(err: &reqwest::Error) -> ErrorClass {
    if let Some(status) = err.status() {
        return classify_http_status(status.as_u16());
    }
    if err.is_decode() || err.is_builder() || err.is_redirect() {
        return ErrorClass::Permanent;
    }
    ErrorClass::Transient
}

/// Source of the random component added to each backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Uniform in `[0, base_delay)`.
    Random,
    /// Always zero. Makes delays deterministic.
    Disabled,
}

/// Tunable parameters for the retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay unit for the exponential schedule.
    pub base_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            jitter: Jitter::Random,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: Jitter::Random,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = Jitter::Disabled;
        self
    }

    /// Delay to wait after the failed `attempt` (1-based) before the next one.
    pub fn backoff_delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .saturating_add(jitter)
    }

    fn sample_jitter(&self) -> Duration {
        match self.jitter {
            Jitter::Disabled => Duration::ZERO,
            Jitter::Random => {
                let base_ms = self.base_delay.as_millis() as u64;
                if base_ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..base_ms))
                }
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `operation` names the call in log lines.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tracing::debug!(operation, attempt, max_attempts, "Attempting operation");

            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::warn!(
                    operation,
                    attempt,
                    error = %err,
                    "Permanent failure, not retrying",
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::error!(
                    operation,
                    attempt,
                    error = %err,
                    "Giving up after {attempt} attempts",
                );
                return Err(err);
            }

            let delay = self.backoff_delay(attempt, self.sample_jitter());
            tracing::warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying",
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky(u32),
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Classify for TestError {
        fn class(&self) -> ErrorClass {
            match self {
                Self::Flaky(_) => ErrorClass::Transient,
                Self::Fatal => ErrorClass::Permanent,
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_when_failures_are_fewer_than_attempts() {
        for failures in 0..4 {
            let calls = AtomicU32::new(0);
            let result = fast_policy(4)
                .run("flaky", || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= failures {
                            Err(TestError::Flaky(n))
                        } else {
                            Ok(n)
                        }
                    }
                })
                .await;
            assert_eq!(result, Ok(failures + 1));
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        }
    }

    #[tokio::test]
    async fn returns_final_failure_when_attempts_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run("always-flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::Flaky(n)) }
            })
            .await;
        assert_eq!(result, Err(TestError::Flaky(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("fatal", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(0)
            .run("once", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Flaky(1)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nested_runs_keep_separate_counters() {
        let policy = fast_policy(3);
        let outer_calls = AtomicU32::new(0);
        let inner_calls = AtomicU32::new(0);

        let result = policy
            .run("outer", || {
                let outer_n = outer_calls.fetch_add(1, Ordering::SeqCst) + 1;
                let policy = &policy;
                let inner_calls = &inner_calls;
                async move {
                    let inner = policy
                        .run("inner", || {
                            let n = inner_calls.fetch_add(1, Ordering::SeqCst) + 1;
                            async move {
                                if n % 2 == 1 {
                                    Err(TestError::Flaky(n))
                                } else {
                                    Ok(n)
                                }
                            }
                        })
                        .await?;
                    if outer_n == 1 {
                        Err(TestError::Flaky(outer_n))
                    } else {
                        Ok(inner)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(4));
        assert_eq!(outer_calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn backoff_without_jitter_doubles_and_never_decreases() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5)).without_jitter();
        let delays: Vec<Duration> = (1..=6)
            .map(|attempt| policy.backoff_delay(attempt, policy.sample_jitter()))
            .collect();
        assert_eq!(delays[0], Duration::from_secs(5));
        assert_eq!(delays[1], Duration::from_secs(10));
        assert_eq!(delays[2], Duration::from_secs(20));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn random_jitter_stays_below_base_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50));
        for _ in 0..200 {
            assert!(policy.sample_jitter() < Duration::from_millis(50));
        }
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(100, Duration::from_secs(5)).without_jitter();
        let _ = policy.backoff_delay(u32::MAX, Duration::ZERO);
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(classify_http_status(429), ErrorClass::Transient);
        assert_eq!(classify_http_status(408), ErrorClass::Transient);
        assert_eq!(classify_http_status(500), ErrorClass::Transient);
        assert_eq!(classify_http_status(503), ErrorClass::Transient);
        assert_eq!(classify_http_status(400), ErrorClass::Permanent);
        assert_eq!(classify_http_status(401), ErrorClass::Permanent);
        assert_eq!(classify_http_status(403), ErrorClass::Permanent);
        assert_eq!(classify_http_status(404), ErrorClass::Permanent);
    }

    #[test]
    fn invalid_request_is_permanent() {
        let err = reqwest::Client::new().get("://bad").build().unwrap_err();
        assert_eq!(classify_request_error(&err), ErrorClass::Permanent);
    }
}
