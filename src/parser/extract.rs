//! Locating the JSON object inside free-form completion text.

use once_cell::sync::Lazy;
use regex::Regex;

static CODE_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").ok());

/// Contents of the first Markdown code fence that holds a `{`, or the input unchanged.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let Some(re) = CODE_FENCE.as_ref() else {
        return text;
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| body.contains('{'))
        .unwrap_or(text)
}

/// Slice from the first `{` to its matching `}`.
///
/// Braces inside string literals (including escaped quotes) are ignored. If the
/// object never balances, the slice runs to the last `}` so the decoder can
/// report the actual syntax problem.
pub(crate) fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_prose() {
        let text = r#"Sure! Here it is: {"summary": "x", "steps": []} Hope that helps."#;
        assert_eq!(extract_object(text), Some(r#"{"summary": "x", "steps": []}"#));
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"{"summary": "use {} and \"}\" carefully", "steps": ["a"]} trailing }"#;
        assert_eq!(
            extract_object(text),
            Some(r#"{"summary": "use {} and \"}\" carefully", "steps": ["a"]}"#)
        );
    }

    #[test]
    fn test_nested_objects() {
        let text = r#"x {"a": {"b": {"c": 1}}, "d": 2} y"#;
        assert_eq!(extract_object(text), Some(r#"{"a": {"b": {"c": 1}}, "d": 2}"#));
    }

    #[test]
    fn test_unbalanced_falls_back_to_last_brace() {
        let text = r#"{"a": {"b": 1}"#;
        assert_eq!(extract_object(text), Some(text));
        assert_eq!(extract_object("no braces here"), None);
        assert_eq!(extract_object("{ never closed"), None);
    }

    #[test]
    fn test_strip_code_fence() {
        let text = "Result:\n```json\n{\"summary\": \"s\"}\n```\nbye";
        assert_eq!(strip_code_fence(text), "{\"summary\": \"s\"}");
        assert_eq!(strip_code_fence("plain {\"a\":1}"), "plain {\"a\":1}");
        // A fence without an object is ignored.
        assert_eq!(strip_code_fence("```\nhello\n```"), "```\nhello\n```");
    }
}
