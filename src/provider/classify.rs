//! Error classification logic

use super::{ProviderError, ProviderErrorKind};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use std::time::Duration;

static RETRY_AFTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)retry[- ]after[:\s]+(\d+)",
        r"(?i)retry in\s+(\d+)(?:\.\d+)?\s*s",
        r"(?i)in\s+(\d+)\s*seconds",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Map an HTTP status to a standard error class name.
pub fn error_class_for_status(status: u16) -> &'static str {
    match status {
        400 => "invalid_request",
        401 => "authentication",
        403 => "permission_denied",
        404 => "not_found",
        408 => "timeout",
        409 => "conflict",
        413 => "request_too_large",
        429 => "rate_limited",
        500 => "server_error",
        502 | 503 => "overloaded",
        504 => "timeout",
        s if s >= 500 => "server_error",
        _ => "other",
    }
}

/// Decide the retry kind for a standard error class.
///
/// - Throttling classes are rate limits (the provider may suggest a wait)
/// - Server-side and conflict classes are transient
/// - Client errors fail on every attempt, so they are fatal
pub fn kind_for_error_class(error_class: &str) -> ProviderErrorKind {
    match error_class {
        "rate_limited" | "quota_exhausted" => ProviderErrorKind::RateLimited,
        "timeout" => ProviderErrorKind::Timeout,
        "overloaded" | "server_error" | "conflict" => ProviderErrorKind::Transient,
        "invalid_request" | "authentication" | "permission_denied" | "not_found"
        | "request_too_large" | "cancelled" => ProviderErrorKind::Fatal,
        // Unknown/other - conservative: don't retry
        _ => ProviderErrorKind::Fatal,
    }
}

/// Quota exhaustion is frequently reported with a non-429 status and a textual marker.
pub fn looks_like_quota_error(body: &str) -> bool {
    let lowered = body.to_lowercase();
    lowered.contains("resource_exhausted") || lowered.contains("quota")
}

/// Best-effort extraction of a retry hint (in seconds) from an error message.
pub fn extract_retry_after(text: &str) -> Option<Duration> {
    RETRY_AFTER_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(Duration::from_secs)
    })
}

/// Best-effort parsing of the `Retry-After` header.
///
/// Only the `Retry-After: <seconds>` form is supported.
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    raw.parse::<u64>().ok().map(Duration::from_secs)
}

/// Classify a non-success HTTP response.
pub fn classify_status(status: u16, body: &str, header_retry_after: Option<Duration>) -> ProviderError {
    let class = if status != 429 && looks_like_quota_error(body) {
        "quota_exhausted"
    } else {
        error_class_for_status(status)
    };
    let message = format!("HTTP {} ({}): {}", status, class, truncate(body, 512));

    match kind_for_error_class(class) {
        ProviderErrorKind::RateLimited => ProviderError::RateLimited {
            retry_after: header_retry_after.or_else(|| extract_retry_after(body)),
            message,
        },
        ProviderErrorKind::Timeout => ProviderError::Timeout { after: None },
        ProviderErrorKind::Transient => ProviderError::Transient { message },
        ProviderErrorKind::Fatal => ProviderError::Fatal { message },
    }
}

/// Classify a transport-level failure (no HTTP status received).
pub fn classify_transport(err: &reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(Some(timeout))
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ProviderError::transient(err.to_string())
    } else {
        ProviderError::fatal(err.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_error_class_kinds() {
        for class in ["rate_limited", "quota_exhausted"] {
            assert_eq!(kind_for_error_class(class), ProviderErrorKind::RateLimited);
        }
        for class in ["overloaded", "server_error", "conflict"] {
            assert_eq!(kind_for_error_class(class), ProviderErrorKind::Transient);
        }
        for class in ["invalid_request", "authentication", "not_found", "other", "http_error"] {
            assert_eq!(
                kind_for_error_class(class),
                ProviderErrorKind::Fatal,
                "Error class '{}' should be fatal",
                class
            );
        }
    }

    #[test]
    fn test_429_uses_header_hint_first() {
        let err = classify_status(429, "slow down, retry after 9", Some(Duration::from_secs(2)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_quota_marker_on_non_429() {
        let err = classify_status(
            403,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Please retry in 31.5s."}}"#,
            None,
        );
        assert_eq!(err.kind(), ProviderErrorKind::RateLimited);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(31)));
    }

    #[test]
    fn test_server_and_client_errors() {
        assert_eq!(classify_status(503, "busy", None).kind(), ProviderErrorKind::Transient);
        assert_eq!(classify_status(504, "", None).kind(), ProviderErrorKind::Timeout);
        assert_eq!(classify_status(401, "bad key", None).kind(), ProviderErrorKind::Fatal);
    }

    #[test]
    fn test_extract_retry_after_patterns() {
        assert_eq!(extract_retry_after("Retry-After: 12"), Some(Duration::from_secs(12)));
        assert_eq!(extract_retry_after("try again in 4 seconds"), Some(Duration::from_secs(4)));
        assert_eq!(extract_retry_after("no hint here"), None);
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static(" 5 "));
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_secs(5)));
        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after_from_headers(&headers), None);
    }
}
