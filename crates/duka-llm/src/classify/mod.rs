//! Three single-purpose classifiers with strict JSON contracts.
//!
//! Each classifier sends one prompt, expects one JSON object back, and
//! validates it hard: unknown fields, out-of-enum values, out-of-range
//! numbers, and oversized strings all reject the result. A rejected result
//! degrades to a safe default (`UNKNOWN` / tenant language / `business`)
//! and is logged — classifier output is advisory, never trusted.

pub mod governor;
pub mod intent;
pub mod language;

use std::sync::Arc;

use crate::provider::{ChatMessage, CompletionRequest, LlmProvider, Role};

pub use governor::{casual_allowance, GovernorResult, RecommendedAction};
pub use intent::IntentResult;
pub use language::LanguageResult;

/// Routing thresholds (exact, per contract).
pub const INTENT_EXECUTE_THRESHOLD: f64 = 0.70;
pub const INTENT_CLARIFY_THRESHOLD: f64 = 0.50;
pub const LANGUAGE_SWITCH_THRESHOLD: f64 = 0.75;

/// Bundle of the three classifiers sharing one pooled provider client.
pub struct Classifiers {
    provider: Arc<dyn LlmProvider>,
    /// Raw intent strings that route straight to the unknown handler.
    unknown_intents: Vec<String>,
}

impl Classifiers {
    pub fn new(provider: Arc<dyn LlmProvider>, unknown_intents: Vec<String>) -> Self {
        Self {
            provider,
            unknown_intents,
        }
    }

    pub async fn intent(&self, history: &[ChatMessage], message: &str) -> IntentResult {
        let req = CompletionRequest {
            system: intent::SYSTEM_PROMPT.to_string(),
            messages: with_current(history, message),
            max_tokens: 512,
            json_mode: true,
        };
        match self.provider.complete(&req).await {
            Ok(text) => intent::parse(&text, &self.unknown_intents),
            Err(e) => {
                tracing::warn!(error = %e, "intent classifier call failed; degrading to UNKNOWN");
                IntentResult::unknown()
            }
        }
    }

    pub async fn language(&self, history: &[ChatMessage], message: &str) -> LanguageResult {
        let req = CompletionRequest {
            system: language::SYSTEM_PROMPT.to_string(),
            messages: with_current(history, message),
            max_tokens: 128,
            json_mode: true,
        };
        match self.provider.complete(&req).await {
            Ok(text) => language::parse(&text),
            Err(e) => {
                tracing::warn!(error = %e, "language classifier call failed; using tenant default");
                LanguageResult::default()
            }
        }
    }

    pub async fn governor(&self, history: &[ChatMessage], message: &str) -> GovernorResult {
        let req = CompletionRequest {
            system: governor::SYSTEM_PROMPT.to_string(),
            messages: with_current(history, message),
            max_tokens: 128,
            json_mode: true,
        };
        match self.provider.complete(&req).await {
            Ok(text) => governor::parse(&text),
            Err(e) => {
                tracing::warn!(error = %e, "governor call failed; proceeding as business");
                GovernorResult::default()
            }
        }
    }
}

fn with_current(history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
    let mut messages = history.to_vec();
    messages.push(ChatMessage {
        role: Role::User,
        content: message.to_string(),
    });
    messages
}

/// Extract the first balanced JSON object from provider text. Providers in
/// json_mode return bare objects, but some wrap them in code fences.
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_object() {
        assert_eq!(extract_json(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn extracts_fenced_object() {
        let text = "```json\n{\"a\": {\"b\": 2}}\n```";
        assert_eq!(extract_json(text), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_depth() {
        let text = r#"{"note": "use } carefully"}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn no_object_yields_none() {
        assert_eq!(extract_json("plain text"), None);
    }
}
