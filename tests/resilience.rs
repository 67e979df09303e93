//! Retry and circuit-breaker behaviour through the public API

mod common;

use ai_analysis_runtime::provider::{
    CompletionProvider, CompletionRequest, ProviderError, ScriptStep, ScriptedProvider,
};
use ai_analysis_runtime::resilience::{CircuitBreaker, CircuitBreakerConfig, GuardedCaller, RetryConfig};
use ai_analysis_runtime::{AnalysisStatus, CircuitState, DegradeReason, Message};
use common::{analyzer, fast_config, BUBBLE_SORT_EN};
use std::sync::Arc;
use std::time::Duration;

fn request() -> CompletionRequest {
    CompletionRequest {
        messages: vec![Message::user("hello")],
        temperature: 0.0,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_then_success_takes_two_attempts() {
    let provider = ScriptedProvider::new("m")
        .then_fail(ProviderError::rate_limited(Some(Duration::from_secs(2))))
        .then_reply("second time lucky");
    let guard = GuardedCaller::new(
        RetryConfig::new().with_max_attempts(3).with_jitter(Duration::ZERO),
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
    );
    let req = request();

    let started = tokio::time::Instant::now();
    let (completion, stats) = guard.call(|_| provider.complete(&req)).await.unwrap();

    assert_eq!(completion.content, "second time lucky");
    assert_eq!(stats.attempts, 2);
    assert!(matches!(stats.last_error, Some(ProviderError::RateLimited { .. })));
    // The server hint replaced the 500ms computed backoff.
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_transient_exhaustion_degrades_without_error() {
    let provider = Arc::new(
        ScriptedProvider::new("m").with_default(ScriptStep::Fail(ProviderError::transient("503"))),
    );
    let analyzer = analyzer(fast_config(), &provider);

    let result = analyzer.analyze("Explain bubble sort", "en", "general").await.unwrap();
    assert_eq!(result.meta.status, AnalysisStatus::Error);
    assert_eq!(result.meta.reason, Some(DegradeReason::Transient));
    assert_eq!(provider.calls(), 3);
    assert_eq!(analyzer.cache_stats().await.size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_degrades() {
    let provider = Arc::new(ScriptedProvider::new("m").with_default(ScriptStep::Hang));
    let mut config = fast_config();
    config.retry.max_attempts = 2;
    config.retry.attempt_timeout_ms = 1_000;
    let analyzer = analyzer(config, &provider);

    let result = analyzer.analyze("Explain bubble sort", "en", "general").await.unwrap();
    assert_eq!(result.meta.reason, Some(DegradeReason::Timeout));
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_fails_fast_and_admits_one_trial() {
    let provider = Arc::new(
        ScriptedProvider::new("m")
            .then_fail(ProviderError::transient("down"))
            .then_fail(ProviderError::transient("down"))
            .then_reply(BUBBLE_SORT_EN)
            .with_delay(Duration::from_millis(100)),
    );
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.cooldown_ms = 1_000;
    let analyzer = analyzer(config, &provider);

    for text in ["problem one", "problem two"] {
        let r = analyzer.analyze(text, "en", "general").await.unwrap();
        assert_eq!(r.meta.reason, Some(DegradeReason::Transient));
    }
    assert_eq!(analyzer.circuit_state(), CircuitState::Open);

    // During the cooldown nothing reaches the provider.
    let fast = analyzer.analyze("problem three", "en", "general").await.unwrap();
    assert_eq!(fast.meta.reason, Some(DegradeReason::CircuitOpen));
    assert_eq!(fast.meta.retry_after_seconds, Some(1));
    assert_eq!(provider.calls(), 2);

    tokio::time::sleep(Duration::from_millis(1_000)).await;

    // After the cooldown exactly one trial goes out; a concurrent caller fails fast.
    let (a, b) = tokio::join!(
        analyzer.analyze("problem four", "en", "general"),
        analyzer.analyze("problem five", "en", "general"),
    );
    let results = [a.unwrap(), b.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| r.meta.reason == Some(DegradeReason::CircuitOpen))
            .count(),
        1
    );
    assert_eq!(provider.calls(), 3);
    assert_eq!(analyzer.circuit_state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_attempted_once() {
    let provider = Arc::new(
        ScriptedProvider::new("m").with_default(ScriptStep::Fail(ProviderError::fatal("invalid api key"))),
    );
    let analyzer = analyzer(fast_config(), &provider);

    let result = analyzer.analyze("Explain bubble sort", "en", "general").await.unwrap();
    assert_eq!(result.meta.reason, Some(DegradeReason::Fatal));
    assert_eq!(provider.calls(), 1);

    let signals = analyzer.signals().await;
    assert_eq!(signals.circuit_breaker.consecutive_failures, 1);
    assert_eq!(signals.pending_calls, 0);
}
