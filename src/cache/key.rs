//! Cache key normalization.

use sha2::{Digest, Sha256};

/// Normalized `(text, language, mode)` tuple.
///
/// Text is trimmed with internal whitespace runs collapsed to a single space;
/// language and mode are trimmed and lowercased. Two requests that normalize to
/// the same tuple share one cache entry and one in-flight call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    text: String,
    language: String,
    mode: String,
}

impl CacheKey {
    pub fn new(text: &str, language: &str, mode: &str) -> Self {
        Self {
            text: normalize_text(text),
            language: language.trim().to_lowercase(),
            mode: mode.trim().to_lowercase(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// SHA-256 of the canonical form; safe to log in place of the raw text.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.language.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.mode.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.text.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digest = self.digest();
        write!(f, "{}/{}/{}", self.language, self.mode, &digest[..12])
    }
}

pub(crate) fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
