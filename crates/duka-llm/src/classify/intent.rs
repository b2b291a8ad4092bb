use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use duka_core::types::{Intent, Journey};

use crate::slots::sanitize_slots;

use super::extract_json;

pub(crate) const SYSTEM_PROMPT: &str = "You classify one customer message for a \
business WhatsApp assistant. Reply with a single JSON object: \
{\"intent\": <one of BROWSE_CATALOG, PRODUCT_QUESTION, PLACE_ORDER, ORDER_STATUS, \
BOOK_SERVICE, MAKE_PAYMENT, ASK_SUPPORT, REQUEST_OFFERS, APPLY_COUPON, \
UPDATE_PREFERENCES, STOP_MESSAGES, REQUEST_HUMAN, GREETING, SMALLTALK, OTHER>, \
\"confidence\": 0..1, \"notes\": short string, \"suggested_journey\": <one of \
sales, support, orders, offers, prefs, governance, payments, booking>, \
\"slots\": flat object of extracted parameters}. No other fields.";

const MAX_NOTES_LEN: usize = 512;

/// Wire shape. `deny_unknown_fields` makes extra keys a hard parse error.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIntentResult {
    intent: String,
    confidence: f64,
    #[serde(default)]
    notes: String,
    suggested_journey: String,
    #[serde(default)]
    slots: BTreeMap<String, Value>,
}

/// Validated intent classification for one turn.
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub notes: String,
    pub suggested_journey: Journey,
    pub slots: BTreeMap<String, Value>,
}

impl IntentResult {
    /// The degraded default used whenever validation rejects the output.
    pub fn unknown() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            notes: String::new(),
            suggested_journey: Journey::Governance,
            slots: BTreeMap::new(),
        }
    }
}

/// Parse and validate classifier output. Any violation degrades to
/// [`IntentResult::unknown`] with a log line; nothing downstream ever sees
/// an invalid result.
pub fn parse(text: &str, unknown_intents: &[String]) -> IntentResult {
    let Some(json) = extract_json(text) else {
        warn!("intent output had no JSON object");
        return IntentResult::unknown();
    };

    let raw: RawIntentResult = match serde_json::from_str(json) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "intent output rejected by schema");
            return IntentResult::unknown();
        }
    };

    if !(0.0..=1.0).contains(&raw.confidence) || !raw.confidence.is_finite() {
        warn!(confidence = raw.confidence, "intent confidence out of range");
        return IntentResult::unknown();
    }
    if raw.notes.chars().count() > MAX_NOTES_LEN {
        warn!(len = raw.notes.len(), "intent notes over limit");
        return IntentResult::unknown();
    }

    // Configured sub-intents route straight to the unknown handler.
    if unknown_intents.iter().any(|u| u == &raw.intent) {
        return IntentResult {
            intent: Intent::Unknown,
            confidence: raw.confidence,
            notes: raw.notes,
            suggested_journey: Journey::Governance,
            slots: BTreeMap::new(),
        };
    }

    let intent = match Intent::from_str(&raw.intent) {
        Ok(i) => i,
        Err(_) => {
            warn!(intent = %raw.intent, "intent outside enum");
            return IntentResult::unknown();
        }
    };
    let suggested_journey = match Journey::from_str(&raw.suggested_journey) {
        Ok(j) => j,
        Err(_) => {
            warn!(journey = %raw.suggested_journey, "suggested journey outside enum");
            return IntentResult::unknown();
        }
    };

    IntentResult {
        intent,
        confidence: raw.confidence,
        notes: raw.notes,
        suggested_journey,
        slots: sanitize_slots(&raw.slots),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_unknowns() -> Vec<String> {
        vec!["OTHER".to_string()]
    }

    #[test]
    fn valid_result_parses() {
        let text = r#"{"intent":"BROWSE_CATALOG","confidence":0.91,"notes":"laptops",
                       "suggested_journey":"sales","slots":{"query":"laptop"}}"#;
        let r = parse(text, &no_unknowns());
        assert_eq!(r.intent, Intent::BrowseCatalog);
        assert_eq!(r.suggested_journey, Journey::Sales);
        assert_eq!(r.slots["query"], "laptop");
    }

    #[test]
    fn unknown_field_rejects_whole_result() {
        let text = r#"{"intent":"BROWSE_CATALOG","confidence":0.9,
                       "suggested_journey":"sales","extra":"nope"}"#;
        let r = parse(text, &no_unknowns());
        assert_eq!(r.intent, Intent::Unknown);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let text = r#"{"intent":"BROWSE_CATALOG","confidence":1.4,"suggested_journey":"sales"}"#;
        assert_eq!(parse(text, &no_unknowns()).intent, Intent::Unknown);
    }

    #[test]
    fn out_of_enum_intent_rejected() {
        let text = r#"{"intent":"HACK_THE_DB","confidence":0.9,"suggested_journey":"sales"}"#;
        assert_eq!(parse(text, &no_unknowns()).intent, Intent::Unknown);
    }

    #[test]
    fn oversized_notes_rejected() {
        let notes = "x".repeat(513);
        let text = format!(
            r#"{{"intent":"GREETING","confidence":0.9,"notes":"{}","suggested_journey":"governance"}}"#,
            notes
        );
        assert_eq!(parse(&text, &no_unknowns()).intent, Intent::Unknown);
    }

    #[test]
    fn configured_other_routes_to_unknown_keeping_confidence() {
        let text = r#"{"intent":"OTHER","confidence":0.8,"suggested_journey":"sales"}"#;
        let r = parse(text, &no_unknowns());
        assert_eq!(r.intent, Intent::Unknown);
        assert_eq!(r.confidence, 0.8);
    }

    #[test]
    fn non_json_degrades() {
        assert_eq!(
            parse("I think they want laptops", &no_unknowns()).intent,
            Intent::Unknown
        );
    }
}
