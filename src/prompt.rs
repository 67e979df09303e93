//! Prompt construction boundary.
//!
//! The wording of prompts belongs to the embedding application; the runtime
//! only needs the message list for a request, in a normal and a strict
//! (language-enforcing) variant.

use crate::types::Message;

/// Which prompt variant to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Normal,
    /// Re-ask after the previous answer was written in the wrong language.
    StrictLanguage,
}

pub trait PromptTemplate: Send + Sync {
    fn build(&self, text: &str, language: &str, mode: &str, variant: PromptVariant) -> Vec<Message>;
}

/// Minimal English template asking for the JSON shape the parser expects.
#[derive(Debug, Clone, Default)]
pub struct DefaultPrompt;

fn language_name(code: &str) -> &str {
    match code {
        "de" => "German",
        "en" => "English",
        "fa" => "Persian",
        other => other,
    }
}

impl PromptTemplate for DefaultPrompt {
    fn build(&self, text: &str, language: &str, mode: &str, variant: PromptVariant) -> Vec<Message> {
        let language = language_name(language);
        let mut system = format!(
            "You analyze problems in the '{mode}' domain. Reply with a single JSON object \
             with the keys \"summary\" (string), \"steps\" (array of strings), and optionally \
             \"example\", \"pseudocode\" and \"visual\" (strings). Write all prose in {language}."
        );
        if variant == PromptVariant::StrictLanguage {
            system.push_str(&format!(
                " Your previous answer was not in {language}. Use only {language} for prose; \
                 technical terms and code may stay as they are."
            ));
        }
        vec![Message::system(system), Message::user(text)]
    }
}
