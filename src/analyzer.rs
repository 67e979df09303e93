//! The public `analyze` operation.
//!
//! ```text
//! analyze ─ validate ─ cache ─(miss)─ coordinator ─ guard ─ provider
//!                                          │
//!                                          └─ parser ─ language policy ─ cache store
//! ```
//!
//! Everything after the cache miss runs inside one spawned producer per key,
//! so concurrent identical requests cost one upstream call and the result is
//! stored exactly once.

use crate::cache::{CacheBackend, CacheKey, CacheManager, CacheStats};
use crate::config::{AnalyzerConfig, LanguagePolicy};
use crate::coordinator::RequestCoordinator;
use crate::parser::{ParsedAnalysis, ResponseParser};
use crate::prompt::{DefaultPrompt, PromptTemplate, PromptVariant};
use crate::provider::{CompletionProvider, CompletionRequest, OpenAiCompatProvider};
use crate::resilience::{CircuitBreaker, CircuitState, GuardedCaller, RateLimiter};
use crate::signals::{InflightSnapshot, SignalsSnapshot};
use crate::types::{AnalysisMeta, AnalysisResult, DegradeReason};
use crate::{Error, ErrorContext, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Inner {
    config: AnalyzerConfig,
    provider: Arc<dyn CompletionProvider>,
    prompt: Arc<dyn PromptTemplate>,
    parser: ResponseParser,
    cache: Arc<CacheManager<AnalysisResult>>,
    coordinator: RequestCoordinator<CacheKey, Arc<AnalysisResult>>,
    guard: GuardedCaller,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cached, deduplicated, failure-tolerant structured analysis over one provider.
///
/// Cheap to clone; clones share cache, circuit and in-flight calls.
#[derive(Clone)]
pub struct Analyzer {
    inner: Arc<Inner>,
}

impl Analyzer {
    pub fn builder() -> AnalyzerBuilder {
        AnalyzerBuilder::new()
    }

    /// Analyzer over `provider` with the default prompt and in-memory cache.
    pub fn new(config: AnalyzerConfig, provider: Arc<dyn CompletionProvider>) -> Result<Self> {
        AnalyzerBuilder::new()
            .with_config(config)
            .with_provider(provider)
            .build()
    }

    /// Analyze `text` in `language` for `mode`.
    ///
    /// Invalid input is returned as `Err(Error::Validation)` before any cache or
    /// provider interaction. Upstream trouble never surfaces as `Err`: it yields
    /// a degraded result whose `meta.reason` names the cause.
    pub async fn analyze(&self, text: &str, language: &str, mode: &str) -> Result<AnalysisResult> {
        self.run(text, language, mode, None).await
    }

    /// Like [`analyze`](Self::analyze); once `cancel` fires this caller gets a
    /// `cancelled` result while the shared upstream call continues for others.
    pub async fn analyze_with_cancel(
        &self,
        text: &str,
        language: &str,
        mode: &str,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        self.run(text, language, mode, Some(cancel)).await
    }

    async fn run(
        &self,
        text: &str,
        language: &str,
        mode: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<AnalysisResult> {
        let request_id = Uuid::new_v4().to_string();
        self.validate(text, language, mode)?;

        let key = CacheKey::new(text, language, mode);
        if let Some(hit) = self.inner.cache.get(&key).await {
            info!(request_id = %request_id, key = %key, cache_hit = true, "analysis served from cache");
            return Ok(hit.with_cache_hit(true));
        }

        let inner = Arc::clone(&self.inner);
        let producer_key = key.clone();
        let producer_request_id = request_id.clone();
        let producer = move || async move {
            let result = inner.produce(&producer_key, &producer_request_id).await;
            Ok(Arc::new(result))
        };

        let outcome = match cancel {
            Some(token) => {
                self.inner
                    .coordinator
                    .execute_with_cancel(key.clone(), producer, token)
                    .await
            }
            None => self.inner.coordinator.execute(key.clone(), producer).await,
        };

        match outcome {
            Ok(result) => {
                info!(
                    request_id = %request_id,
                    key = %key,
                    cache_hit = result.meta.cache_hit,
                    status = ?result.meta.status,
                    reason = result.meta.reason.map(|r| r.as_str()).unwrap_or("none"),
                    "analysis finished"
                );
                Ok(result.as_ref().clone())
            }
            Err(Error::Cancelled) => {
                info!(request_id = %request_id, key = %key, "analysis cancelled");
                Ok(self.inner.degraded(&key, DegradeReason::Cancelled, None))
            }
            Err(e) => Err(e),
        }
    }

    fn validate(&self, text: &str, language: &str, mode: &str) -> Result<()> {
        let analysis = &self.inner.config.analysis;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::validation_with_context(
                "text must not be empty",
                ErrorContext::new()
                    .with_field_path("request.text")
                    .with_source("input_validator"),
            ));
        }
        let chars = trimmed.chars().count();
        if chars > analysis.max_input_chars {
            return Err(Error::validation_with_context(
                "text is too long",
                ErrorContext::new()
                    .with_field_path("request.text")
                    .with_details(format!("{} characters, limit {}", chars, analysis.max_input_chars))
                    .with_source("input_validator"),
            ));
        }
        let language = language.trim().to_lowercase();
        if !analysis.supports_language(&language) {
            return Err(Error::validation_with_context(
                format!("unsupported language '{}'", language),
                ErrorContext::new()
                    .with_field_path("request.language")
                    .with_details(format!("supported: {}", analysis.languages.join(", ")))
                    .with_source("input_validator"),
            ));
        }
        if mode.trim().is_empty() {
            return Err(Error::validation_with_context(
                "mode must not be empty",
                ErrorContext::new()
                    .with_field_path("request.mode")
                    .with_source("input_validator"),
            ));
        }
        Ok(())
    }

    /// Cancel in-flight producers and stop the cache sweeper.
    pub fn shutdown(&self) {
        info!("analyzer shutting down");
        self.inner.shutdown.cancel();
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            handle.abort();
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.guard.breaker().state()
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.coordinator.pending_calls()
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.inner.config
    }

    pub fn model(&self) -> &str {
        self.inner.provider.model_name()
    }

    pub async fn signals(&self) -> SignalsSnapshot {
        let guard = &self.inner.guard;
        let max = self.inner.config.rate_limit.max_inflight;
        let inflight = guard.inflight_available().map(|available| InflightSnapshot {
            max,
            available,
            in_use: max.saturating_sub(available),
        });
        let rate_limiter = match guard.rate_limiter() {
            Some(rl) => Some(rl.snapshot().await),
            None => None,
        };

        SignalsSnapshot {
            cache: self.inner.cache.stats().await,
            circuit_breaker: guard.breaker().snapshot(),
            rate_limiter,
            inflight,
            pending_calls: self.inner.coordinator.pending_calls(),
        }
    }
}

impl Inner {
    /// Runs once per admitted key; always yields a result, degraded on failure.
    /// Fresh results carry `cache_hit = false`.
    async fn produce(&self, key: &CacheKey, request_id: &str) -> AnalysisResult {
        // A previous call for this key may have settled after our caller's lookup.
        if let Some(hit) = self.cache.recheck(key).await {
            debug!(request_id = %request_id, key = %key, "analysis stored while waiting for admission");
            return hit.with_cache_hit(true);
        }

        let first = self.attempt(key, PromptVariant::Normal).await;
        let result = match first {
            Ok(parsed) if parsed.language.matched => self.success(key, parsed),
            Ok(parsed) => self.on_language_mismatch(key, request_id, parsed).await,
            Err(e) => self.degrade_for(key, request_id, &e),
        };

        if result.is_ok() {
            self.cache.set(key.clone(), Arc::new(result.clone())).await;
        }
        result
    }

    async fn on_language_mismatch(
        &self,
        key: &CacheKey,
        request_id: &str,
        parsed: ParsedAnalysis,
    ) -> AnalysisResult {
        let policy = self.config.analysis.language_policy;
        warn!(
            request_id = %request_id,
            key = %key,
            ratio = parsed.language.ratio,
            threshold = parsed.language.threshold,
            policy = ?policy,
            "completion language mismatch"
        );
        match policy {
            LanguagePolicy::Accept => self.success(key, parsed),
            LanguagePolicy::Reject => self.degraded(key, DegradeReason::LanguageMismatch, None),
            LanguagePolicy::RetryStrict => match self.attempt(key, PromptVariant::StrictLanguage).await {
                Ok(retried) if retried.language.matched => self.success(key, retried),
                Ok(retried) => {
                    warn!(
                        request_id = %request_id,
                        key = %key,
                        ratio = retried.language.ratio,
                        "strict re-ask still in the wrong language"
                    );
                    self.degraded(key, DegradeReason::LanguageMismatch, None)
                }
                Err(e) => self.degrade_for(key, request_id, &e),
            },
        }
    }

    /// One guarded completion plus parsing.
    async fn attempt(&self, key: &CacheKey, variant: PromptVariant) -> Result<ParsedAnalysis> {
        let request = CompletionRequest {
            messages: self.prompt.build(key.text(), key.language(), key.mode(), variant),
            temperature: self.config.provider.temperature,
            timeout: self.config.retry.attempt_timeout(),
        };
        let provider = &self.provider;
        let (completion, stats) = self
            .guard
            .call(|attempt| {
                debug!(key = %key, attempt, variant = ?variant, "calling provider");
                provider.complete(&request)
            })
            .await?;
        debug!(
            key = %key,
            attempts = stats.attempts,
            duration_ms = stats.duration_ms,
            tokens = completion.tokens_used,
            "completion received"
        );
        Ok(self.parser.parse(&completion.content, key.language())?)
    }

    fn success(&self, key: &CacheKey, parsed: ParsedAnalysis) -> AnalysisResult {
        parsed.into_result(AnalysisMeta::ok(key.language(), key.mode(), self.provider.model_name()))
    }

    fn degraded(&self, key: &CacheKey, reason: DegradeReason, retry_after: Option<Duration>) -> AnalysisResult {
        AnalysisResult::degraded(
            reason,
            retry_after.map(ceil_secs),
            key.language(),
            key.mode(),
            self.provider.model_name(),
        )
    }

    fn degrade_for(&self, key: &CacheKey, request_id: &str, err: &Error) -> AnalysisResult {
        let (reason, retry_after) = match err {
            Error::CircuitOpen { retry_in } => (DegradeReason::CircuitOpen, *retry_in),
            Error::ProviderRateLimited { retry_after, .. } => (DegradeReason::RateLimited, *retry_after),
            Error::ProviderTimeout { .. } => (DegradeReason::Timeout, None),
            Error::ProviderTransient { .. } => (DegradeReason::Transient, None),
            Error::Parse(_) => (DegradeReason::Parse, None),
            Error::Cancelled => (DegradeReason::Cancelled, None),
            Error::ProviderFatal { .. }
            | Error::Validation { .. }
            | Error::Configuration { .. }
            | Error::Runtime { .. } => (DegradeReason::Fatal, None),
        };
        warn!(
            request_id = %request_id,
            key = %key,
            reason = reason.as_str(),
            error = %err,
            "analysis degraded"
        );
        self.degraded(key, reason, retry_after)
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Builder for [`Analyzer`].
pub struct AnalyzerBuilder {
    config: AnalyzerConfig,
    provider: Option<Arc<dyn CompletionProvider>>,
    prompt: Option<Arc<dyn PromptTemplate>>,
    cache_backend: Option<Box<dyn CacheBackend<AnalysisResult>>>,
}

impl AnalyzerBuilder {
    pub fn new() -> Self {
        Self {
            config: AnalyzerConfig::default(),
            provider: None,
            prompt: None,
            cache_backend: None,
        }
    }

    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an [`OpenAiCompatProvider`] built from `config.provider`.
    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PromptTemplate>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Replace the in-memory cache backend.
    pub fn with_cache_backend(mut self, backend: Box<dyn CacheBackend<AnalysisResult>>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Build the analyzer. Starts the cache sweeper when called inside a Tokio runtime.
    pub fn build(self) -> Result<Analyzer> {
        let config = self.config;
        config.validate()?;

        let provider: Arc<dyn CompletionProvider> = match self.provider {
            Some(p) => p,
            None => Arc::new(OpenAiCompatProvider::new(&config.provider)?),
        };
        let prompt: Arc<dyn PromptTemplate> = match self.prompt {
            Some(p) => p,
            None => Arc::new(DefaultPrompt),
        };

        let cache = Arc::new(match self.cache_backend {
            Some(backend) => CacheManager::new(config.cache.clone(), backend),
            None => CacheManager::from_config(config.cache.clone()),
        });

        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let mut guard = GuardedCaller::new(config.retry.clone(), breaker)
            .with_max_inflight(config.rate_limit.max_inflight);
        if config.rate_limit.is_throttling() {
            guard = guard.with_rate_limiter(Arc::new(RateLimiter::new(config.rate_limit.clone())));
        }

        let shutdown = CancellationToken::new();
        let sweeper = match (config.cache.enabled, config.cache.sweep_interval()) {
            (true, Some(interval)) if tokio::runtime::Handle::try_current().is_ok() => {
                Some(cache.spawn_sweeper(interval, shutdown.child_token()))
            }
            _ => None,
        };

        info!(
            model = provider.model_name(),
            cache_enabled = config.cache.enabled,
            max_entries = config.cache.max_entries,
            max_attempts = config.retry.max_attempts,
            failure_threshold = config.circuit_breaker.failure_threshold,
            language_policy = ?config.analysis.language_policy,
            "analyzer ready"
        );

        Ok(Analyzer {
            inner: Arc::new(Inner {
                parser: ResponseParser::new(config.analysis.language_check.clone()),
                coordinator: RequestCoordinator::with_shutdown(shutdown.child_token()),
                config,
                provider,
                prompt,
                cache,
                guard,
                shutdown,
                sweeper: Mutex::new(sweeper),
            }),
        })
    }
}

impl Default for AnalyzerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ScriptedProvider};
    use crate::types::AnalysisStatus;

    const OK_EN: &str = r#"{"summary": "Bubble sort repeatedly swaps neighbours", "steps": ["compare", "swap"]}"#;

    fn config() -> AnalyzerConfig {
        let mut config = AnalyzerConfig::default();
        config.retry.jitter_ms = 0;
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 100;
        config.cache.sweep_interval_secs = 0;
        config
    }

    fn analyzer(config: AnalyzerConfig, provider: &Arc<ScriptedProvider>) -> Analyzer {
        Analyzer::new(config, Arc::clone(provider) as Arc<dyn CompletionProvider>).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_cached() {
        let provider = Arc::new(ScriptedProvider::new("test-model").then_reply(OK_EN));
        let analyzer = analyzer(config(), &provider);

        let first = analyzer.analyze("Explain bubble sort", "en", "general").await.unwrap();
        assert!(first.is_ok());
        assert!(!first.meta.cache_hit);
        assert_eq!(first.meta.model, "test-model");

        let second = analyzer.analyze("  Explain   bubble sort ", "EN", "general").await.unwrap();
        assert!(second.meta.cache_hit);
        assert_eq!(second.summary, first.summary);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_validation_touches_nothing() {
        let provider = Arc::new(ScriptedProvider::new("m"));
        let analyzer = analyzer(config(), &provider);

        for (text, lang, mode) in [("   ", "en", "general"), ("x", "fr", "general"), ("x", "en", " ")] {
            let err = analyzer.analyze(text, lang, mode).await.unwrap_err();
            assert!(matches!(err, Error::Validation { .. }));
        }
        let long = "a".repeat(5001);
        assert!(analyzer.analyze(&long, "en", "general").await.is_err());

        assert_eq!(provider.calls(), 0);
        let stats = analyzer.cache_stats().await;
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_results_are_not_cached() {
        let provider = Arc::new(
            ScriptedProvider::new("m")
                .then_fail(ProviderError::fatal("bad request"))
                .then_reply(OK_EN),
        );
        let analyzer = analyzer(config(), &provider);

        let first = analyzer.analyze("Explain bubble sort", "en", "general").await.unwrap();
        assert_eq!(first.meta.status, AnalysisStatus::Error);
        assert_eq!(first.meta.reason, Some(DegradeReason::Fatal));

        let second = analyzer.analyze("Explain bubble sort", "en", "general").await.unwrap();
        assert!(second.is_ok());
        assert!(!second.meta.cache_hit);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_reports_quota() {
        let provider = Arc::new(
            ScriptedProvider::new("m")
                .with_default(crate::provider::ScriptStep::Fail(ProviderError::rate_limited(Some(
                    Duration::from_millis(1500),
                )))),
        );
        let analyzer = analyzer(config(), &provider);

        let result = analyzer.analyze("Explain bubble sort", "en", "general").await.unwrap();
        assert_eq!(result.meta.status, AnalysisStatus::Quota);
        assert_eq!(result.meta.retry_after_seconds, Some(2));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_reask_recovers_language() {
        let provider = Arc::new(
            ScriptedProvider::new("m")
                .then_reply(r#"{"summary": "The array is sorted by swapping neighbours", "steps": ["compare elements"]}"#)
                .then_reply(r#"{"summary": "آرایه با جابجایی عناصر مرتب می‌شود", "steps": ["مقایسه"]}"#),
        );
        let analyzer = analyzer(config(), &provider);

        let result = analyzer.analyze("مرتب سازی حبابی", "fa", "general").await.unwrap();
        assert!(result.is_ok());
        assert_eq!(provider.calls(), 2);
        let requests = provider.requests();
        assert!(requests[1].messages[0].content.len() > requests[0].messages[0].content.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_policy_degrades_without_reask() {
        let provider = Arc::new(ScriptedProvider::new("m").then_reply(OK_EN));
        let mut config = config();
        config.analysis.language_policy = LanguagePolicy::Reject;
        let analyzer = analyzer(config, &provider);

        let result = analyzer.analyze("مرتب سازی حبابی", "fa", "general").await.unwrap();
        assert_eq!(result.meta.reason, Some(DegradeReason::LanguageMismatch));
        assert_eq!(provider.calls(), 1);
        assert_eq!(analyzer.cache_stats().await.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_policy_keeps_result() {
        let provider = Arc::new(ScriptedProvider::new("m").then_reply(OK_EN));
        let mut config = config();
        config.analysis.language_policy = LanguagePolicy::Accept;
        let analyzer = analyzer(config, &provider);

        let result = analyzer.analyze("مرتب سازی حبابی", "fa", "general").await.unwrap();
        assert!(result.is_ok());
        assert_eq!(analyzer.cache_stats().await.size, 1);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(3001)), 4);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
