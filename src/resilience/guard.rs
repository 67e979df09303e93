//! Guarded upstream calls: circuit admission, throttling, per-attempt timeout
//! and classified retries with exponential backoff.

use super::circuit_breaker::CircuitBreaker;
use super::rate_limiter::RateLimiter;
use crate::provider::{ProviderError, ProviderErrorKind};
use crate::{Error, ErrorContext, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the uniform random jitter added to each backoff.
    /// The sum never exceeds `max_delay_ms`.
    pub jitter_ms: u64,
    pub attempt_timeout_ms: u64,
    /// Server retry-after hints longer than this end the loop instead of being waited out.
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_ms: 250,
            attempt_timeout_ms: 30_000,
            max_retry_after_secs: 60,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = jitter.as_millis() as u64;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after_secs = max.as_secs();
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    /// `min(base * 2^(attempt-1), max)`, jitter excluded. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Bookkeeping for one guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStats {
    pub attempts: u32,
    pub duration_ms: u64,
    /// Last failure seen before the call succeeded, if any.
    pub last_error: Option<ProviderError>,
}

/// Wraps upstream operations with the circuit breaker and retry policy.
pub struct GuardedCaller {
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    limiter: Option<Arc<RateLimiter>>,
    inflight: Option<Arc<Semaphore>>,
}

impl GuardedCaller {
    pub fn new(retry: RetryConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            retry,
            breaker,
            limiter: None,
            inflight: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// `0` leaves concurrency unbounded.
    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.inflight = (max_inflight > 0).then(|| Arc::new(Semaphore::new(max_inflight)));
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn inflight_available(&self) -> Option<usize> {
        self.inflight.as_ref().map(|s| s.available_permits())
    }

    /// Run `op` under the guard. `op` receives the 1-based attempt number.
    ///
    /// Returns `Error::CircuitOpen` without calling `op` when the circuit
    /// rejects the call; otherwise the error variant matching the terminal provider
    /// failure. Exactly one outcome is recorded on the circuit.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<(T, CallStats)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let permit = self.breaker.allow()?;
        let attempt_timeout = self.retry.attempt_timeout();
        let started = Instant::now();
        let mut last_error = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }
            let slot = match &self.inflight {
                Some(sem) => Some(Arc::clone(sem).acquire_owned().await.map_err(|_| {
                    Error::runtime_with_context(
                        "in-flight limiter closed",
                        ErrorContext::new().with_source("guarded_caller"),
                    )
                })?),
                None => None,
            };

            let outcome = match tokio::time::timeout(attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(Some(attempt_timeout))),
            };
            drop(slot);

            let err = match outcome {
                Ok(value) => {
                    permit.success();
                    let duration_ms = started.elapsed().as_millis() as u64;
                    debug!(attempts = attempt, duration_ms, "upstream call succeeded");
                    return Ok((
                        value,
                        CallStats {
                            attempts: attempt,
                            duration_ms,
                            last_error,
                        },
                    ));
                }
                Err(err) => err,
            };

            let Some(delay) = self.next_delay(&err, attempt) else {
                permit.failure();
                warn!(
                    attempts = attempt,
                    kind = %err.kind(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "upstream call failed"
                );
                return Err(Error::from_provider(err, attempt));
            };

            warn!(
                attempt,
                kind = %err.kind(),
                delay_ms = delay.as_millis() as u64,
                "upstream attempt failed, retrying"
            );
            if let (Some(limiter), Some(hint)) = (&self.limiter, err.retry_after()) {
                limiter.pause_for(hint).await;
            }
            last_error = Some(err);
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before the next attempt, or `None` when the loop must stop.
    fn next_delay(&self, err: &ProviderError, attempt: u32) -> Option<Duration> {
        if err.kind() == ProviderErrorKind::Fatal || attempt >= self.retry.max_attempts {
            return None;
        }
        if let Some(hint) = err.retry_after() {
            return (hint <= self.retry.max_retry_after()).then_some(hint);
        }
        let jitter = if self.retry.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.retry.jitter_ms)
        } else {
            0
        };
        let max = Duration::from_millis(self.retry.max_delay_ms);
        Some((self.retry.backoff(attempt) + Duration::from_millis(jitter)).min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn caller(max_attempts: u32) -> GuardedCaller {
        let retry = RetryConfig::new()
            .with_max_attempts(max_attempts)
            .with_backoff(Duration::from_millis(100), Duration::from_millis(1000))
            .with_jitter(Duration::ZERO)
            .with_attempt_timeout(Duration::from_secs(1));
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::new().with_failure_threshold(2),
        ));
        GuardedCaller::new(retry, breaker)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig::new().with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(350));
        assert_eq!(retry.backoff(60), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_never_exceeds_max_delay() {
        let retry = RetryConfig::new()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(150))
            .with_jitter(Duration::from_millis(500));
        let guard = GuardedCaller::new(
            retry,
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        );
        let err = ProviderError::transient("503");
        for _ in 0..200 {
            let delay = guard.next_delay(&err, 1).unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
        assert_eq!(guard.next_delay(&err, 2), Some(Duration::from_millis(150)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let guard = caller(3);
        let calls = AtomicU32::new(0);
        let (value, stats) = guard
            .call(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::transient("connection reset"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "done");
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.last_error, Some(ProviderError::transient("connection reset")));
        assert_eq!(guard.breaker().snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_overrides_backoff() {
        let guard = caller(3);
        let start = Instant::now();
        let (_, stats) = guard
            .call(|attempt| async move {
                if attempt == 1 {
                    Err(ProviderError::rate_limited(Some(Duration::from_secs(5))))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(stats.attempts, 2);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_excessive_retry_after_stops_loop() {
        let guard = caller(5);
        let err = guard
            .call(|_| async { Err::<(), _>(ProviderError::rate_limited(Some(Duration::from_secs(600)))) })
            .await
            .unwrap_err();
        match err {
            Error::ProviderRateLimited { retry_after, attempts } => {
                assert_eq!(retry_after, Some(Duration::from_secs(600)));
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let guard = caller(5);
        let calls = AtomicU32::new(0);
        let err = guard
            .call(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::fatal("invalid api key")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderFatal { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_classified() {
        let guard = caller(2);
        let err = guard
            .call(|_| std::future::pending::<std::result::Result<(), ProviderError>>())
            .await
            .unwrap_err();
        match err {
            Error::ProviderTimeout { timeout, attempts } => {
                assert_eq!(timeout, Some(Duration::from_secs(1)));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_counts_once_on_circuit() {
        let guard = caller(3);
        for _ in 0..2 {
            let _ = guard
                .call(|_| async { Err::<(), _>(ProviderError::transient("503")) })
                .await;
        }
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let err = guard
            .call(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inflight_cap_is_released() {
        let guard = caller(1).with_max_inflight(1);
        assert_eq!(guard.inflight_available(), Some(1));
        guard.call(|_| async { Ok::<_, ProviderError>(()) }).await.unwrap();
        assert_eq!(guard.inflight_available(), Some(1));
    }
}
