//! 上游模型边界：单方法的补全接口与固定的错误分类。
//!
//! # Provider Boundary
//!
//! The runtime depends on exactly one upstream capability: turning a list of
//! chat messages into raw completion text. Everything provider-specific lives
//! behind [`CompletionProvider`], and every failure crossing this boundary is
//! already classified into a [`ProviderError`] so that retry and circuit logic
//! dispatch on the kind, never on message text.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CompletionProvider`] | The upstream contract (`complete` + `model_name`) |
//! | [`OpenAiCompatProvider`] | HTTP implementation for OpenAI-compatible endpoints |
//! | [`ScriptedProvider`] | Deterministic test double with queued outcomes |
//! | [`classify`] | Status / error-class / body classification helpers |

pub mod classify;
mod openai_compat;
mod scripted;

pub use openai_compat::OpenAiCompatProvider;
pub use scripted::{ScriptStep, ScriptedProvider};

use crate::types::message::Message;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One upstream completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    /// Upper bound the provider should apply to the underlying transport.
    pub timeout: Duration,
}

/// Raw completion returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<u32>,
}

/// Classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited (retry after {retry_after:?}): {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("timed out (after {after:?})")]
    Timeout { after: Option<Duration> },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("fatal failure: {message}")]
    Fatal { message: String },
}

/// Coarse kind used for retry dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    RateLimited,
    Timeout,
    Transient,
    Fatal,
}

impl ProviderError {
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        ProviderError::RateLimited {
            retry_after,
            message: "rate limited".to_string(),
        }
    }

    pub fn timeout(after: Option<Duration>) -> Self {
        ProviderError::Timeout { after }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ProviderError::Fatal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::RateLimited { .. } => ProviderErrorKind::RateLimited,
            ProviderError::Timeout { .. } => ProviderErrorKind::Timeout,
            ProviderError::Transient { .. } => ProviderErrorKind::Transient,
            ProviderError::Fatal { .. } => ProviderErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() != ProviderErrorKind::Fatal
    }

    /// Server-suggested wait, only ever present on rate-limit failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Transient => "transient",
            ProviderErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The narrow upstream contract the runtime depends on.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Model identifier reported in result metadata.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_is_not_retryable() {
        assert!(ProviderError::rate_limited(None).is_retryable());
        assert!(ProviderError::timeout(None).is_retryable());
        assert!(ProviderError::transient("reset").is_retryable());
        assert!(!ProviderError::fatal("bad request").is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let hint = Some(Duration::from_secs(3));
        assert_eq!(ProviderError::rate_limited(hint).retry_after(), hint);
        assert_eq!(ProviderError::transient("x").retry_after(), None);
        assert_eq!(ProviderError::rate_limited(hint).kind().to_string(), "rate_limited");
    }
}
