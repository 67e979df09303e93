//! Script-based language consistency check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Technical vocabulary that may appear in Latin script inside any language.
const TECHNICAL_TERMS: &[&str] = &[
    "algorithm", "array", "bfs", "binary", "bubblesort", "class", "dfs", "dijkstra", "false",
    "float", "function", "graph", "hash", "hashmap", "heap", "heapsort", "http", "index",
    "insertion", "integer", "java", "javascript", "json", "linked", "list", "loop", "matrix",
    "mergesort", "node", "null", "object", "pivot", "pointer", "pseudocode", "python", "queue",
    "quicksort", "recursion", "return", "rust", "search", "selection", "sort", "sql", "stack",
    "string", "tree", "true", "vector", "while",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Arabic,
}

impl Script {
    pub fn for_language(language: &str) -> Option<Self> {
        match language {
            "de" | "en" => Some(Script::Latin),
            "fa" => Some(Script::Arabic),
            _ => None,
        }
    }

    pub fn contains(&self, ch: char) -> bool {
        match self {
            Script::Latin => is_latin(ch),
            Script::Arabic => matches!(ch,
                '\u{0600}'..='\u{06FF}'
                | '\u{0750}'..='\u{077F}'
                | '\u{FB50}'..='\u{FDFF}'
                | '\u{FE70}'..='\u{FEFF}'),
        }
    }
}

fn is_latin(ch: char) -> bool {
    ch.is_ascii_alphabetic()
        || matches!(ch, '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageCheckConfig {
    /// Minimum in-script ratio per language code.
    pub thresholds: BTreeMap<String, f64>,
    /// Used for languages without an explicit threshold.
    pub default_threshold: f64,
    /// Latin tokens up to this many letters are exempt in non-Latin languages.
    pub max_exempt_token_len: usize,
    /// Extra exempt terms on top of the built-in technical vocabulary.
    pub extra_terms: Vec<String>,
}

impl Default for LanguageCheckConfig {
    fn default() -> Self {
        let thresholds = [("de", 0.85), ("en", 0.85), ("fa", 0.5)]
            .into_iter()
            .map(|(lang, t)| (lang.to_string(), t))
            .collect();
        Self {
            thresholds,
            default_threshold: 0.6,
            max_exempt_token_len: 4,
            extra_terms: Vec::new(),
        }
    }
}

impl LanguageCheckConfig {
    pub fn threshold_for(&self, language: &str) -> f64 {
        self.thresholds
            .get(language)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    fn is_exempt(&self, token: &str) -> bool {
        if !token.chars().all(is_latin) {
            return false;
        }
        if token.chars().count() <= self.max_exempt_token_len {
            return true;
        }
        let lower = token.to_lowercase();
        TECHNICAL_TERMS.contains(&lower.as_str())
            || self.extra_terms.iter().any(|t| t.eq_ignore_ascii_case(&lower))
    }
}

/// Outcome of the language check; a mismatch is reported, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LanguageCheck {
    /// Fraction of judged letters written in the expected script.
    pub ratio: f64,
    pub threshold: f64,
    pub matched: bool,
}

impl LanguageCheck {
    fn unjudged() -> Self {
        Self {
            ratio: 1.0,
            threshold: 0.0,
            matched: true,
        }
    }
}

/// Measure how much of `texts` is written in the script of `language`.
///
/// Languages without a known script always match. Text with no judged letters
/// (for example only numbers and exempt tokens) has ratio 1.0.
pub fn check_language<'a, I>(texts: I, language: &str, config: &LanguageCheckConfig) -> LanguageCheck
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(script) = Script::for_language(language) else {
        return LanguageCheck::unjudged();
    };

    let mut judged = 0usize;
    let mut in_script = 0usize;
    for text in texts {
        for token in text.split(|c: char| !c.is_alphabetic()).filter(|t| !t.is_empty()) {
            if script != Script::Latin && config.is_exempt(token) {
                continue;
            }
            for ch in token.chars() {
                judged += 1;
                if script.contains(ch) {
                    in_script += 1;
                }
            }
        }
    }

    let threshold = config.threshold_for(language);
    let ratio = if judged == 0 {
        1.0
    } else {
        in_script as f64 / judged as f64
    };
    LanguageCheck {
        ratio,
        threshold,
        matched: ratio >= threshold,
    }
}
