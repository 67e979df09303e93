//! Runtime configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. A YAML file (every section and field optional)
//! 3. `AI_ANALYZE_*` environment variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AI_ANALYZE_CACHE_ENABLED` | `cache.enabled` (`1`/`0`/`true`/`false`) |
//! | `AI_ANALYZE_CACHE_MAX_ENTRIES` | `cache.max_entries` |
//! | `AI_ANALYZE_CACHE_TTL_SECS` | `cache.default_ttl_secs` |
//! | `AI_ANALYZE_MAX_ATTEMPTS` | `retry.max_attempts` |
//! | `AI_ANALYZE_BASE_DELAY_MS` | `retry.base_delay_ms` |
//! | `AI_ANALYZE_MAX_DELAY_MS` | `retry.max_delay_ms` |
//! | `AI_ANALYZE_ATTEMPT_TIMEOUT_MS` | `retry.attempt_timeout_ms` |
//! | `AI_ANALYZE_BREAKER_FAILURE_THRESHOLD` | `circuit_breaker.failure_threshold` |
//! | `AI_ANALYZE_BREAKER_COOLDOWN_SECS` | `circuit_breaker.cooldown_ms` (in seconds) |
//! | `AI_ANALYZE_RPS` / `AI_ANALYZE_RPM` | `rate_limit.rps` |
//! | `AI_ANALYZE_MAX_INFLIGHT` | `rate_limit.max_inflight` |
//! | `AI_ANALYZE_PROVIDER` | `provider.name` |
//! | `AI_ANALYZE_BASE_URL` | `provider.base_url` |
//! | `AI_ANALYZE_MODEL` | `provider.model` |
//! | `AI_ANALYZE_TEMPERATURE` | `provider.temperature` |
//! | `AI_ANALYZE_MAX_INPUT_CHARS` | `analysis.max_input_chars` |
//! | `AI_ANALYZE_LANGUAGE_POLICY` | `analysis.language_policy` |

use crate::cache::CacheConfig;
use crate::parser::LanguageCheckConfig;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

const ENV_PREFIX: &str = "AI_ANALYZE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Short provider id; also selects the `<NAME>_API_KEY` fallback variable.
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.2,
        }
    }
}

/// What to do when a completion is not written in the requested language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguagePolicy {
    /// Keep the result and log a warning.
    Accept,
    /// Ask once more with the strict prompt, then degrade.
    #[default]
    RetryStrict,
    /// Degrade immediately.
    Reject,
}

impl FromStr for LanguagePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(LanguagePolicy::Accept),
            "retry_strict" | "retry-strict" | "retry" => Ok(LanguagePolicy::RetryStrict),
            "reject" => Ok(LanguagePolicy::Reject),
            other => Err(Error::configuration_with_context(
                format!("unknown language policy '{}'", other),
                ErrorContext::new()
                    .with_field_path("analysis.language_policy")
                    .with_details("expected accept, retry_strict or reject"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Limit on the trimmed input, counted in characters.
    pub max_input_chars: usize,
    pub languages: Vec<String>,
    pub language_policy: LanguagePolicy,
    pub language_check: LanguageCheckConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 5000,
            languages: vec!["de".to_string(), "en".to_string(), "fa".to_string()],
            language_policy: LanguagePolicy::default(),
            language_check: LanguageCheckConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimiterConfig,
    pub provider: ProviderConfig,
    pub analysis: AnalysisConfig,
}

impl AnalyzerConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults or `path`, then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(std::env::vars())
    }

    /// Apply `AI_ANALYZE_*` overrides from an explicit variable list.
    pub fn apply_env_from<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut rpm = None;
        for (name, value) in vars {
            let Some(knob) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match knob {
                "CACHE_ENABLED" => self.cache.enabled = parse_flag(&name, &value)?,
                "CACHE_MAX_ENTRIES" => self.cache.max_entries = parse_env(&name, &value)?,
                "CACHE_TTL_SECS" => self.cache.default_ttl_secs = parse_env(&name, &value)?,
                "MAX_ATTEMPTS" => self.retry.max_attempts = parse_env(&name, &value)?,
                "BASE_DELAY_MS" => self.retry.base_delay_ms = parse_env(&name, &value)?,
                "MAX_DELAY_MS" => self.retry.max_delay_ms = parse_env(&name, &value)?,
                "ATTEMPT_TIMEOUT_MS" => self.retry.attempt_timeout_ms = parse_env(&name, &value)?,
                "BREAKER_FAILURE_THRESHOLD" => {
                    self.circuit_breaker.failure_threshold = parse_env(&name, &value)?
                }
                "BREAKER_COOLDOWN_SECS" => {
                    let secs: u64 = parse_env(&name, &value)?;
                    self.circuit_breaker.cooldown_ms = secs.saturating_mul(1000);
                }
                "RPS" => self.set_rps(parse_env(&name, &value)?),
                "RPM" => rpm = Some(parse_env::<f64>(&name, &value)?),
                "MAX_INFLIGHT" => self.rate_limit.max_inflight = parse_env(&name, &value)?,
                "PROVIDER" => self.provider.name = value.trim().to_string(),
                "BASE_URL" => self.provider.base_url = value.trim().to_string(),
                "MODEL" => self.provider.model = value.trim().to_string(),
                "TEMPERATURE" => self.provider.temperature = parse_env(&name, &value)?,
                "MAX_INPUT_CHARS" => self.analysis.max_input_chars = parse_env(&name, &value)?,
                "LANGUAGE_POLICY" => self.analysis.language_policy = value.parse()?,
                _ => {}
            }
        }
        // RPS wins when both are set.
        if let Some(rpm) = rpm {
            if self.rate_limit.rps <= 0.0 {
                self.set_rps(rpm / 60.0);
            }
        }
        Ok(())
    }

    fn set_rps(&mut self, rps: f64) {
        self.rate_limit.rps = rps;
        self.rate_limit.burst = self.rate_limit.burst.max(rps.max(1.0));
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be at least 1 when caching is enabled"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(invalid("retry.attempt_timeout_ms", "must be positive"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.base_delay_ms", "must not exceed retry.max_delay_ms"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        let rl = &self.rate_limit;
        if !rl.rps.is_finite() || rl.rps < 0.0 {
            return Err(invalid("rate_limit.rps", "must be a finite, non-negative number"));
        }
        if rl.rps > 0.0 && rl.burst < 1.0 {
            return Err(invalid("rate_limit.burst", "must be at least 1"));
        }
        if self.provider.model.trim().is_empty() {
            return Err(invalid("provider.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(invalid("provider.temperature", "must be within 0.0..=2.0"));
        }
        if self.analysis.max_input_chars == 0 {
            return Err(invalid("analysis.max_input_chars", "must be positive"));
        }
        if self.analysis.languages.is_empty() {
            return Err(invalid("analysis.languages", "must list at least one language"));
        }
        let check = &self.analysis.language_check;
        let thresholds = check
            .thresholds
            .values()
            .chain(std::iter::once(&check.default_threshold));
        for t in thresholds {
            if !(0.0..=1.0).contains(t) {
                return Err(invalid(
                    "analysis.language_check.thresholds",
                    "must be within 0.0..=1.0",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}", field),
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("config_validator"),
    )
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        Error::configuration_with_context(
            format!("cannot parse environment variable {}", name),
            ErrorContext::new()
                .with_field_path(name)
                .with_details(format!("value '{}'", value))
                .with_source("config_env"),
        )
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => parse_env(name, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalyzerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.analysis.max_input_chars, 5000);
        assert_eq!(config.analysis.language_policy, LanguagePolicy::RetryStrict);
        assert!(config.analysis.supports_language("fa"));
        assert!(!config.analysis.supports_language("fr"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AnalyzerConfig::from_yaml_str(
            r#"
cache:
  max_entries: 50
retry:
  max_attempts: 5
analysis:
  language_policy: reject
"#,
        )
        .unwrap();
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.analysis.language_policy, LanguagePolicy::Reject);
    }

    #[test]
    fn test_env_overrides_yaml() {
        let mut config = AnalyzerConfig::from_yaml_str("provider:\n  model: from-yaml\n").unwrap();
        config
            .apply_env_from(vars(&[
                ("AI_ANALYZE_MODEL", "from-env"),
                ("AI_ANALYZE_CACHE_ENABLED", "0"),
                ("AI_ANALYZE_BREAKER_COOLDOWN_SECS", "12"),
                ("AI_ANALYZE_RPM", "120"),
                ("AI_ANALYZE_LANGUAGE_POLICY", "accept"),
                ("UNRELATED", "x"),
            ]))
            .unwrap();
        assert_eq!(config.provider.model, "from-env");
        assert!(!config.cache.enabled);
        assert_eq!(config.circuit_breaker.cooldown_ms, 12_000);
        assert_eq!(config.rate_limit.rps, 2.0);
        assert_eq!(config.analysis.language_policy, LanguagePolicy::Accept);
    }

    #[test]
    fn test_bad_env_value_names_variable() {
        let err = AnalyzerConfig::default()
            .apply_env_from(vars(&[("AI_ANALYZE_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("AI_ANALYZE_MAX_ATTEMPTS")
        );
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = AnalyzerConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        let mut config = AnalyzerConfig::default();
        config.analysis.language_check.default_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("analysis.language_check.thresholds")
        );
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = AnalyzerConfig::default();
        config.provider.api_key = Some("secret".into());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }
}
