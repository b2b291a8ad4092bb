use duka_core::types::{Intent, Journey};
use duka_llm::classify::{IntentResult, INTENT_CLARIFY_THRESHOLD, INTENT_EXECUTE_THRESHOLD};

/// What the threshold routing decided for this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Execute(Journey),
    Clarify,
    Unknown,
}

/// Journey each intent belongs to. This is the dispatch table keyed by the
/// intent enumerator — adding an intent without a row here is a compile
/// error.
pub fn journey_for_intent(intent: Intent) -> Journey {
    match intent {
        Intent::BrowseCatalog | Intent::ProductQuestion | Intent::PlaceOrder => Journey::Sales,
        Intent::OrderStatus => Journey::Orders,
        Intent::BookService => Journey::Booking,
        Intent::MakePayment => Journey::Payments,
        Intent::AskSupport => Journey::Support,
        Intent::RequestOffers | Intent::ApplyCoupon => Journey::Offers,
        Intent::UpdatePreferences | Intent::StopMessages => Journey::Prefs,
        Intent::RequestHuman
        | Intent::Greeting
        | Intent::Smalltalk
        | Intent::Other
        | Intent::Unknown => Journey::Governance,
    }
}

/// Apply the exact confidence thresholds:
/// ≥ 0.70 execute, [0.50, 0.70) clarify, < 0.50 unknown handler.
pub fn route(result: &IntentResult, active_journey: Option<Journey>) -> Routing {
    if result.confidence < INTENT_CLARIFY_THRESHOLD {
        return Routing::Unknown;
    }
    if result.confidence < INTENT_EXECUTE_THRESHOLD {
        return Routing::Clarify;
    }
    Routing::Execute(resolve_journey(result, active_journey))
}

/// Pick the journey to execute. The classifier's suggestion and the intent's
/// own journey usually agree; when they do not, that is a tie — prefer
/// whichever matches the currently active journey, otherwise the
/// lexicographically earliest name, so routing stays deterministic.
fn resolve_journey(result: &IntentResult, active_journey: Option<Journey>) -> Journey {
    let from_intent = journey_for_intent(result.intent);
    let suggested = result.suggested_journey;
    if from_intent == suggested {
        return from_intent;
    }
    if let Some(active) = active_journey {
        if active == from_intent {
            return from_intent;
        }
        if active == suggested {
            return suggested;
        }
    }
    if suggested.as_str() < from_intent.as_str() {
        suggested
    } else {
        from_intent
    }
}
