use tracing::info;

use duka_core::types::Intent;
use duka_llm::classify::IntentResult;
use duka_sessions::types::Conversation;
use duka_sessions::ConversationState;
use duka_tools::handoff::HandoffSnapshot;
use duka_tools::{ToolContext, ToolResult, Tools};

use crate::action::BotAction;

/// Tool errors in a row before the conversation escalates.
const TOOL_ERROR_STREAK_LIMIT: u32 = 2;
/// Clarification loops in one conversation before escalating.
const CLARIFY_LOOP_LIMIT: u32 = 3;
/// High-confidence REQUEST_HUMAN threshold.
const REQUEST_HUMAN_CONFIDENCE: f64 = 0.70;

const HUMAN_KEYWORDS: &[&str] = &[
    "talk to a person",
    "talk to someone",
    "real person",
    "human",
    "agent",
    "mtu halisi",
    "nataka kuongea na mtu",
];

/// Slot topics that always go to a person.
const SENSITIVE_TOPICS: &[&str] = &["refund", "dispute", "complaint", "chargeback"];

/// Evaluate the escalation triggers for this turn. Returns the reason when
/// any trigger fires.
pub fn trigger(
    state: &ConversationState,
    conversation: &Conversation,
    intent: &IntentResult,
    message: &str,
) -> Option<String> {
    if intent.intent == Intent::RequestHuman && intent.confidence >= REQUEST_HUMAN_CONFIDENCE {
        return Some("customer asked for a human".to_string());
    }
    let lower = message.to_lowercase();
    if HUMAN_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Some("customer asked for a human".to_string());
    }
    if let Some(topic) = intent.slots.get("topic").and_then(|v| v.as_str()) {
        if SENSITIVE_TOPICS.iter().any(|t| topic.eq_ignore_ascii_case(t)) {
            return Some(format!("sensitive topic: {}", topic));
        }
    }
    if conversation.tool_error_streak >= TOOL_ERROR_STREAK_LIMIT {
        return Some("repeated tool failures".to_string());
    }
    if conversation.clarify_count >= CLARIFY_LOOP_LIMIT {
        return Some("clarification loop exhausted".to_string());
    }
    if state.escalated {
        return Some(
            state
                .escalation_reason
                .clone()
                .unwrap_or_else(|| "prior escalation flag".to_string()),
        );
    }
    None
}

/// Create the handoff ticket, mark the state, and produce the customer-facing
/// acknowledgment. The caller flips the Conversation row to handoff (or
/// closed, per the tenant knob) and persists the state.
pub fn perform(
    state: &mut ConversationState,
    tools: &Tools,
    ctx: &ToolContext,
    reason: &str,
) -> ToolResult<BotAction> {
    let snapshot = HandoffSnapshot {
        tenant_id: state.tenant_id.clone(),
        customer_id: state.customer_id.clone(),
        journey: state.signals.journey.map(|j| j.to_string()),
        step: state.payment.status.clone(),
        last_intent: state.signals.intent.map(|i| i.to_string()),
        cart: serde_json::to_value(&state.cart).unwrap_or(serde_json::Value::Null),
        order_id: state.order_id.clone(),
        last_question: state.response_text.clone(),
    };

    let ticket = tools.handoff_create_ticket(ctx, &state.customer_id, reason, &snapshot)?;

    state.escalated = true;
    state.escalation_reason = Some(reason.to_string());
    state.handoff_ticket_id = Some(ticket.id.clone());

    info!(
        tenant_id = %state.tenant_id,
        conversation_id = %state.conversation_id,
        ticket_id = %ticket.id,
        reason,
        "conversation escalated to handoff"
    );

    Ok(BotAction::Handoff {
        body: format!(
            "I'm connecting you with our team — someone will get back to you {}.",
            ticket.expected_timeline
        ),
        ticket_id: ticket.id,
    })
}
