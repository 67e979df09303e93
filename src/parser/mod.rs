//! 响应解析模块：从模型自由文本中提取并校验结构化分析结果。
//!
//! # Response Parser
//!
//! The upstream model is asked for a single JSON object but routinely wraps it
//! in prose or a Markdown fence. [`ResponseParser::parse`] recovers the object,
//! enforces the required fields and reports (without failing) whether the text
//! is written in the requested language's script.
//!
//! | Step | Behaviour |
//! |------|-----------|
//! | Decode | Whole text as-is first |
//! | Fence | Otherwise the first code fence holding `{` |
//! | Scan | Otherwise the first `{` to its matching `}` |
//! | Fields | `summary` non-empty string, `steps` array; optional `example`, `pseudocode`, `visual` |
//! | Normalize | Strings trimmed, empty steps dropped, empty optionals become `None` |
//! | Language | [`LanguageCheck`] over summary and steps |

mod extract;
pub mod language;

pub use language::{check_language, LanguageCheck, LanguageCheckConfig, Script};

use crate::types::{AnalysisMeta, AnalysisResult};
use serde_json::{Map, Value};
use thiserror::Error;

/// Malformed upstream output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("completion is empty")]
    Empty,

    #[error("no JSON object found in completion")]
    NoJsonObject,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("top-level JSON value is not an object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Validated analysis body plus the language check outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnalysis {
    pub summary: String,
    pub steps: Vec<String>,
    pub example: Option<String>,
    pub pseudocode: Option<String>,
    pub visual: Option<String>,
    pub language: LanguageCheck,
}

impl ParsedAnalysis {
    pub fn into_result(self, meta: AnalysisMeta) -> AnalysisResult {
        AnalysisResult {
            summary: self.summary,
            steps: self.steps,
            example: self.example,
            pseudocode: self.pseudocode,
            visual: self.visual,
            meta,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    language: LanguageCheckConfig,
}

impl ResponseParser {
    pub fn new(language: LanguageCheckConfig) -> Self {
        Self { language }
    }

    pub fn language_config(&self) -> &LanguageCheckConfig {
        &self.language
    }

    pub fn parse(&self, raw: &str, expected_language: &str) -> Result<ParsedAnalysis, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }
        let Value::Object(obj) = decode(trimmed)? else {
            return Err(ParseError::NotAnObject);
        };

        let summary = match obj.get("summary") {
            None | Some(Value::Null) => return Err(ParseError::MissingField("summary")),
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(_) => {
                return Err(ParseError::InvalidField {
                    field: "summary",
                    expected: "a non-empty string",
                })
            }
        };
        let steps = match obj.get("steps") {
            None | Some(Value::Null) => return Err(ParseError::MissingField("steps")),
            Some(Value::Array(items)) => items.iter().filter_map(step_text).collect::<Vec<_>>(),
            Some(_) => {
                return Err(ParseError::InvalidField {
                    field: "steps",
                    expected: "an array",
                })
            }
        };

        let language = check_language(
            std::iter::once(summary.as_str()).chain(steps.iter().map(String::as_str)),
            expected_language,
            &self.language,
        );

        Ok(ParsedAnalysis {
            example: optional_text(&obj, "example"),
            pseudocode: optional_text(&obj, "pseudocode"),
            visual: optional_text(&obj, "visual"),
            summary,
            steps,
            language,
        })
    }
}

/// A fence inside a JSON string must not shadow an answer that already decodes.
fn decode(text: &str) -> Result<Value, ParseError> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }
    let fenced = extract::strip_code_fence(text);
    if fenced.len() != text.len() {
        if let Ok(value) = serde_json::from_str::<Value>(fenced) {
            return Ok(value);
        }
    }
    let slice = extract::extract_object(text).ok_or(ParseError::NoJsonObject)?;
    serde_json::from_str(slice).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

fn step_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Strings are trimmed, line arrays are joined, anything else is rendered as JSON.
fn optional_text(obj: &Map<String, Value>, field: &str) -> Option<String> {
    let text = match obj.get(field)? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Array(lines) => lines
            .iter()
            .filter_map(step_text)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}
