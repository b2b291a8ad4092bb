use serde::{Deserialize, Serialize};

use duka_core::types::{GovernorClass, Intent, Journey, Language};
use duka_tenancy::types::TenantPersona;

use crate::types::KeyFact;

/// Classifier outputs for the current turn. Reset at the start of every turn;
/// thresholds are applied by the router, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnSignals {
    pub intent: Option<Intent>,
    pub intent_confidence: f64,
    pub journey: Option<Journey>,
    pub response_language: Option<Language>,
    pub language_confidence: f64,
    pub governor_classification: Option<GovernorClass>,
    pub governor_confidence: f64,
    /// Sanitized slot values extracted alongside the intent.
    #[serde(default)]
    pub slots: std::collections::BTreeMap<String, serde_json::Value>,
}

/// Where the customer is in catalog discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogCursor {
    pub last_query: Option<String>,
    pub last_filters: std::collections::BTreeMap<String, String>,
    /// Item ids shown in the last shortlist (capped at six).
    pub last_results: Vec<String>,
    pub total_estimate: u64,
    pub selected_item_ids: Vec<String>,
    /// Times the customer rejected a shortlist this conversation.
    pub shortlist_rejections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentState {
    pub payment_request_id: Option<String>,
    pub status: Option<String>,
    pub method: Option<String>,
    pub amount_cents: Option<i64>,
    /// Amount echoed back and confirmed by the customer before initiation.
    pub amount_confirmed: bool,
}

/// Customer preference snapshot carried into the turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerPrefs {
    pub language_pref: Option<String>,
    pub marketing_opt_in: bool,
    pub notification_prefs: std::collections::BTreeMap<String, bool>,
}

/// Appointment created during the current turn; the worker consumes this to
/// schedule the reminder job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedAppointment {
    pub appointment_id: String,
    pub scheduled_for: String,
}

/// A KB snippet retrieved for grounding a support answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbSnippet {
    pub snippet: String,
    pub score: f64,
    pub source: String,
}

/// The per-conversation working memory: created on the first inbound message,
/// mutated by the pipeline under the conversation lock, persisted across
/// turns, expired after the inactivity TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub tenant_id: String,
    pub conversation_id: String,
    /// Fresh per turn; correlates logs across subsystems.
    pub request_id: String,
    pub customer_id: String,
    pub customer_phone: String,

    pub persona: TenantPersona,
    #[serde(default)]
    pub prefs: CustomerPrefs,
    #[serde(default)]
    pub signals: TurnSignals,
    #[serde(default)]
    pub catalog: CatalogCursor,
    #[serde(default)]
    pub cart: Vec<CartLine>,
    pub order_id: Option<String>,
    pub order_total_cents: Option<i64>,
    #[serde(default)]
    pub payment: PaymentState,
    #[serde(default)]
    pub kb_snippets: Vec<KbSnippet>,
    pub booked_appointment: Option<BookedAppointment>,

    #[serde(default)]
    pub escalated: bool,
    pub escalation_reason: Option<String>,
    pub handoff_ticket_id: Option<String>,

    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub casual_turns: u32,
    #[serde(default)]
    pub spam_turns: u32,

    #[serde(default)]
    pub key_facts: Vec<KeyFact>,
    pub summary: Option<String>,

    /// Final reply text produced by the subflow for this turn.
    pub response_text: Option<String>,
}

impl ConversationState {
    pub fn new(
        tenant_id: &str,
        conversation_id: &str,
        customer_id: &str,
        customer_phone: &str,
        persona: TenantPersona,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            customer_phone: customer_phone.to_string(),
            persona,
            prefs: CustomerPrefs::default(),
            signals: TurnSignals::default(),
            catalog: CatalogCursor::default(),
            cart: Vec::new(),
            order_id: None,
            order_total_cents: None,
            payment: PaymentState::default(),
            kb_snippets: Vec::new(),
            booked_appointment: None,
            escalated: false,
            escalation_reason: None,
            handoff_ticket_id: None,
            turn_count: 0,
            casual_turns: 0,
            spam_turns: 0,
            key_facts: Vec::new(),
            summary: None,
            response_text: None,
        }
    }

    /// Reset per-turn fields and mint a new request id. Carried fields
    /// (cart, cursor, counters, payment, active journey) survive between
    /// turns — the journey carries so the router can prefer the subflow the
    /// customer is already in.
    pub fn begin_turn(&mut self) {
        let active_journey = self.signals.journey;
        self.request_id = uuid::Uuid::new_v4().to_string();
        self.signals = TurnSignals {
            journey: active_journey,
            ..TurnSignals::default()
        };
        self.kb_snippets.clear();
        self.booked_appointment = None;
        self.response_text = None;
        self.turn_count += 1;
    }

    pub fn cart_total_cents(&self) -> i64 {
        self.cart
            .iter()
            .map(|l| l.unit_price_cents * l.quantity as i64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> TenantPersona {
        TenantPersona {
            bot_name: "Makena".into(),
            bot_intro: "Karibu!".into(),
            tone_style: "friendly".into(),
            default_language: "en".into(),
            allowed_languages: vec!["en".into(), "sw".into()],
            max_chattiness_level: 2,
            catalog_link_base: None,
            payments_enabled: true,
            handoff_policy: "business_hours".into(),
        }
    }

    #[test]
    fn begin_turn_resets_signals_but_keeps_cart() {
        let mut state = ConversationState::new("t1", "conv1", "c1", "+254700000001", persona());
        state.cart.push(CartLine {
            item_id: "p1".into(),
            name: "Laptop".into(),
            quantity: 2,
            unit_price_cents: 4_500_000,
        });
        state.signals.intent = Some(Intent::BrowseCatalog);
        let req1 = state.request_id.clone();

        state.begin_turn();
        assert!(state.signals.intent.is_none());
        assert_eq!(state.cart.len(), 1);
        assert_eq!(state.turn_count, 1);
        assert_ne!(state.request_id, req1);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = ConversationState::new("t1", "conv1", "c1", "+254700000001", persona());
        state.payment.payment_request_id = Some("pay_1".into());
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payment.payment_request_id.as_deref(), Some("pay_1"));
        assert_eq!(back.tenant_id, "t1");
    }

    #[test]
    fn cart_total() {
        let mut state = ConversationState::new("t1", "conv1", "c1", "+254700000001", persona());
        state.cart.push(CartLine {
            item_id: "p1".into(),
            name: "A".into(),
            quantity: 2,
            unit_price_cents: 100,
        });
        state.cart.push(CartLine {
            item_id: "p2".into(),
            name: "B".into(),
            quantity: 1,
            unit_price_cents: 50,
        });
        assert_eq!(state.cart_total_cents(), 250);
    }
}
