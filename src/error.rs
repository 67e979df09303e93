use crate::parser::ParseError;
use crate::provider::ProviderError;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.text", "cache.max_entries")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., limit, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "input_validator", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the analysis runtime.
///
/// Cloneable on purpose: one settled single-flight outcome is handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Provider timed out after {attempts} attempt(s) (per-attempt limit {timeout:?})")]
    ProviderTimeout {
        timeout: Option<Duration>,
        attempts: u32,
    },

    #[error("Provider rate limited after {attempts} attempt(s) (retry after {retry_after:?})")]
    ProviderRateLimited {
        retry_after: Option<Duration>,
        attempts: u32,
    },

    #[error("Transient provider failure after {attempts} attempt(s): {message}")]
    ProviderTransient { message: String, attempts: u32 },

    #[error("Fatal provider failure: {message}")]
    ProviderFatal { message: String },

    #[error("Response parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Circuit breaker open (retry in {retry_in:?})")]
    CircuitOpen { retry_in: Option<Duration> },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Map the terminal provider error of a retry loop to the caller-facing taxonomy.
    pub(crate) fn from_provider(err: ProviderError, attempts: u32) -> Self {
        match err {
            ProviderError::RateLimited { retry_after, .. } => Error::ProviderRateLimited {
                retry_after,
                attempts,
            },
            ProviderError::Timeout { after } => Error::ProviderTimeout {
                timeout: after,
                attempts,
            },
            ProviderError::Transient { message } => Error::ProviderTransient { message, attempts },
            ProviderError::Fatal { message } => Error::ProviderFatal { message },
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether the error was produced before any upstream attempt was made.
    pub fn is_fast_fail(&self) -> bool {
        matches!(self, Error::Validation { .. } | Error::CircuitOpen { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::configuration_with_context(
            e.to_string(),
            ErrorContext::new().with_source("io"),
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::configuration_with_context(
            e.to_string(),
            ErrorContext::new().with_source("config_yaml"),
        )
    }
}
