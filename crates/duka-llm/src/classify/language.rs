use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

use duka_core::types::Language;

use super::{extract_json, LANGUAGE_SWITCH_THRESHOLD};

pub(crate) const SYSTEM_PROMPT: &str = "Detect the language the customer should be \
answered in. Reply with one JSON object: {\"response_language\": <one of en, sw, \
sheng, mixed>, \"confidence\": 0..1, \"should_ask_language_question\": bool}. \
No other fields.";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLanguageResult {
    response_language: String,
    confidence: f64,
    #[serde(default)]
    should_ask_language_question: bool,
}

#[derive(Debug, Clone)]
pub struct LanguageResult {
    pub response_language: Option<Language>,
    pub confidence: f64,
    pub should_ask_language_question: bool,
}

impl Default for LanguageResult {
    /// Degraded default: no detection, callers fall through to the customer
    /// preference or the tenant default.
    fn default() -> Self {
        Self {
            response_language: None,
            confidence: 0.0,
            should_ask_language_question: false,
        }
    }
}

pub fn parse(text: &str) -> LanguageResult {
    let Some(json) = extract_json(text) else {
        warn!("language output had no JSON object");
        return LanguageResult::default();
    };
    let raw: RawLanguageResult = match serde_json::from_str(json) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "language output rejected by schema");
            return LanguageResult::default();
        }
    };
    if !(0.0..=1.0).contains(&raw.confidence) || !raw.confidence.is_finite() {
        warn!(confidence = raw.confidence, "language confidence out of range");
        return LanguageResult::default();
    }
    let lang = match Language::from_str(&raw.response_language) {
        Ok(l) => l,
        Err(_) => {
            warn!(language = %raw.response_language, "language outside enum");
            return LanguageResult::default();
        }
    };
    LanguageResult {
        response_language: Some(lang),
        confidence: raw.confidence,
        should_ask_language_question: raw.should_ask_language_question,
    }
}

/// The switch rule:
/// an explicit customer preference always wins; otherwise the detected
/// language is used only when confidence ≥ 0.75 AND the tenant allows it;
/// otherwise the tenant default.
pub fn decide(
    result: &LanguageResult,
    customer_pref: Option<&str>,
    allowed_languages: &[String],
    tenant_default: &str,
) -> String {
    if let Some(pref) = customer_pref {
        return pref.to_string();
    }
    if let Some(lang) = result.response_language {
        if result.confidence >= LANGUAGE_SWITCH_THRESHOLD
            && allowed_languages.iter().any(|a| a == lang.as_str())
        {
            return lang.as_str().to_string();
        }
    }
    tenant_default.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["en".to_string(), "sw".to_string()]
    }

    #[test]
    fn high_confidence_allowed_language_switches() {
        let r = parse(r#"{"response_language":"sw","confidence":0.9,"should_ask_language_question":false}"#);
        assert_eq!(decide(&r, None, &allowed(), "en"), "sw");
    }

    #[test]
    fn low_confidence_falls_back_to_default() {
        let r = parse(r#"{"response_language":"sw","confidence":0.6,"should_ask_language_question":false}"#);
        assert_eq!(decide(&r, None, &allowed(), "en"), "en");
    }

    #[test]
    fn disallowed_language_falls_back_even_when_confident() {
        let r = parse(r#"{"response_language":"sheng","confidence":0.95,"should_ask_language_question":false}"#);
        assert_eq!(decide(&r, None, &allowed(), "en"), "en");
    }

    #[test]
    fn explicit_customer_preference_overrides_classifier() {
        let r = parse(r#"{"response_language":"en","confidence":0.99,"should_ask_language_question":false}"#);
        assert_eq!(decide(&r, Some("sw"), &allowed(), "en"), "sw");
    }

    #[test]
    fn threshold_is_inclusive() {
        let r = parse(r#"{"response_language":"sw","confidence":0.75,"should_ask_language_question":false}"#);
        assert_eq!(decide(&r, None, &allowed(), "en"), "sw");
    }

    #[test]
    fn schema_violation_degrades() {
        let r = parse(r#"{"response_language":"sw","confidence":0.9,"bonus":true}"#);
        assert!(r.response_language.is_none());
        assert_eq!(decide(&r, None, &allowed(), "en"), "en");
    }
}
