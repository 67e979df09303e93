//! Structured analysis result returned to callers.
//!
//! Results are immutable once built and are shared as `Arc<AnalysisResult>`
//! between the cache and all concurrent readers; the only per-read variation
//! (`cache_hit`) is applied on a copy via [`AnalysisResult::with_cache_hit`].

use serde::{Deserialize, Serialize};

/// Outcome class reported in `meta.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Ok,
    Error,
    Quota,
}

/// Why a result was degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    CircuitOpen,
    RateLimited,
    Timeout,
    Transient,
    Fatal,
    Parse,
    LanguageMismatch,
    Cancelled,
}

impl DegradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradeReason::CircuitOpen => "circuit_open",
            DegradeReason::RateLimited => "rate_limited",
            DegradeReason::Timeout => "timeout",
            DegradeReason::Transient => "transient",
            DegradeReason::Fatal => "fatal",
            DegradeReason::Parse => "parse",
            DegradeReason::LanguageMismatch => "language_mismatch",
            DegradeReason::Cancelled => "cancelled",
        }
    }

    pub fn status(&self) -> AnalysisStatus {
        match self {
            DegradeReason::RateLimited => AnalysisStatus::Quota,
            _ => AnalysisStatus::Error,
        }
    }

    /// Neutral placeholder summary; callers localize by `reason`.
    pub fn placeholder(&self) -> &'static str {
        match self {
            DegradeReason::RateLimited => "Quota exceeded. Please try again later.",
            DegradeReason::CircuitOpen => "The analysis service is temporarily unavailable.",
            DegradeReason::LanguageMismatch => "The response was not in the requested language.",
            DegradeReason::Parse => "A valid response could not be produced.",
            DegradeReason::Cancelled => "The analysis was cancelled.",
            DegradeReason::Timeout | DegradeReason::Transient | DegradeReason::Fatal => {
                "An error occurred. Please try again."
            }
        }
    }
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    #[serde(rename = "type")]
    pub status: AnalysisStatus,
    #[serde(rename = "lang")]
    pub language: String,
    pub mode: String,
    pub model: String,
    #[serde(rename = "cached")]
    pub cache_hit: bool,
    pub retry_after_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DegradeReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub steps: Vec<String>,
    pub example: Option<String>,
    pub pseudocode: Option<String>,
    pub visual: Option<String>,
    pub meta: AnalysisMeta,
}

impl AnalysisMeta {
    pub fn ok(language: impl Into<String>, mode: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Ok,
            language: language.into(),
            mode: mode.into(),
            model: model.into(),
            cache_hit: false,
            retry_after_seconds: None,
            reason: None,
        }
    }
}

impl AnalysisResult {
    /// Degraded result with an empty body and a placeholder summary.
    pub fn degraded(
        reason: DegradeReason,
        retry_after_seconds: Option<u64>,
        language: impl Into<String>,
        mode: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            summary: reason.placeholder().to_string(),
            steps: Vec::new(),
            example: None,
            pseudocode: None,
            visual: None,
            meta: AnalysisMeta {
                status: reason.status(),
                language: language.into(),
                mode: mode.into(),
                model: model.into(),
                cache_hit: false,
                retry_after_seconds,
                reason: Some(reason),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.meta.status == AnalysisStatus::Ok
    }

    pub fn with_cache_hit(&self, cache_hit: bool) -> Self {
        let mut copy = self.clone();
        copy.meta.cache_hit = cache_hit;
        copy
    }
}
