//! 弹性模块：熔断、重试退避与客户端限流，保护上游模型服务。
//!
//! # Resilience Module
//!
//! Everything that stands between a cache miss and the upstream provider.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`GuardedCaller`] | Circuit admission, throttling, per-attempt timeout and classified retries |
//! | [`CircuitBreaker`] | Closed / Open / HalfOpen breaker with a single half-open trial |
//! | [`RateLimiter`] | Token bucket shared by all keys, honours provider back-off hints |
//!
//! ## Retry rules
//!
//! - `Fatal` failures end the loop at once
//! - A server `retry_after` replaces the computed backoff; hints above
//!   `max_retry_after` end the loop
//! - Otherwise the delay is `min(base * 2^(n-1), max)` plus uniform jitter,
//!   capped again at `max`
//! - Exhaustion records a single failure on the circuit
//!
//! ```rust
//! use ai_analysis_runtime::resilience::{CircuitBreaker, CircuitBreakerConfig, GuardedCaller, RetryConfig};
//! use ai_analysis_runtime::provider::ProviderError;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = Arc::new(CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_reset_timeout(Duration::from_secs(30)),
//! ));
//! let guard = GuardedCaller::new(RetryConfig::new().with_max_attempts(3), breaker);
//! let (value, stats) = guard
//!     .call(|_attempt| async { Ok::<_, ProviderError>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!((value, stats.attempts), (42, 1));
//! # }
//! ```

pub mod circuit_breaker;
pub mod guard;
pub mod rate_limiter;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitPermit, CircuitState,
};
pub use guard::{CallStats, GuardedCaller, RetryConfig};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
