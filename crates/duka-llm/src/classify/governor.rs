use serde::Deserialize;
use tracing::warn;

use duka_core::types::GovernorClass;

use super::extract_json;

pub(crate) const SYSTEM_PROMPT: &str = "Judge whether this inbound message is \
business, casual chat, spam, or abuse. Reply with one JSON object: \
{\"classification\": <one of business, casual, spam, abuse>, \"confidence\": 0..1, \
\"recommended_action\": <one of proceed, redirect, limit, stop, handoff>}. \
No other fields.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Proceed,
    Redirect,
    Limit,
    Stop,
    Handoff,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGovernorResult {
    classification: String,
    confidence: f64,
    recommended_action: String,
}

#[derive(Debug, Clone)]
pub struct GovernorResult {
    pub classification: GovernorClass,
    pub confidence: f64,
    pub recommended_action: RecommendedAction,
}

impl Default for GovernorResult {
    /// Degraded default: treat as business and proceed. A governor outage
    /// must not silence legitimate customers.
    fn default() -> Self {
        Self {
            classification: GovernorClass::Business,
            confidence: 0.0,
            recommended_action: RecommendedAction::Proceed,
        }
    }
}

pub fn parse(text: &str) -> GovernorResult {
    let Some(json) = extract_json(text) else {
        warn!("governor output had no JSON object");
        return GovernorResult::default();
    };
    let raw: RawGovernorResult = match serde_json::from_str(json) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "governor output rejected by schema");
            return GovernorResult::default();
        }
    };
    if !(0.0..=1.0).contains(&raw.confidence) || !raw.confidence.is_finite() {
        warn!(confidence = raw.confidence, "governor confidence out of range");
        return GovernorResult::default();
    }
    let classification = match raw.classification.as_str() {
        "business" => GovernorClass::Business,
        "casual" => GovernorClass::Casual,
        "spam" => GovernorClass::Spam,
        "abuse" => GovernorClass::Abuse,
        other => {
            warn!(classification = other, "governor classification outside enum");
            return GovernorResult::default();
        }
    };
    let recommended_action = match raw.recommended_action.as_str() {
        "proceed" => RecommendedAction::Proceed,
        "redirect" => RecommendedAction::Redirect,
        "limit" => RecommendedAction::Limit,
        "stop" => RecommendedAction::Stop,
        "handoff" => RecommendedAction::Handoff,
        other => {
            warn!(action = other, "governor action outside enum");
            return GovernorResult::default();
        }
    };
    GovernorResult {
        classification,
        confidence: raw.confidence,
        recommended_action,
    }
}

/// Casual turns allowed before redirecting to business, by the tenant's
/// chattiness level: 0 = strict, 1 = one greeting, 2 = two casual turns
/// (default), 3 = four casual turns.
pub fn casual_allowance(max_chattiness_level: u8) -> u32 {
    match max_chattiness_level {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_governor_output_parses() {
        let r = parse(r#"{"classification":"spam","confidence":0.8,"recommended_action":"limit"}"#);
        assert_eq!(r.classification, GovernorClass::Spam);
        assert_eq!(r.recommended_action, RecommendedAction::Limit);
    }

    #[test]
    fn out_of_enum_action_degrades_to_business() {
        let r = parse(r#"{"classification":"spam","confidence":0.8,"recommended_action":"nuke"}"#);
        assert_eq!(r.classification, GovernorClass::Business);
        assert_eq!(r.recommended_action, RecommendedAction::Proceed);
    }

    #[test]
    fn chattiness_ladder() {
        assert_eq!(casual_allowance(0), 0);
        assert_eq!(casual_allowance(1), 1);
        assert_eq!(casual_allowance(2), 2);
        assert_eq!(casual_allowance(3), 4);
        assert_eq!(casual_allowance(7), 4);
    }
}
