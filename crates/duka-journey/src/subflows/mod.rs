//! Journey subflows. Each is a deterministic sequence of tool calls ending
//! in a [`BotAction`]; no LLM call happens in here. Anything a subflow
//! cannot answer from tools becomes an escalation, never an invention.

pub mod booking;
pub mod governance;
pub mod offers;
pub mod orders;
pub mod payments;
pub mod prefs;
pub mod sales;
pub mod support;

use thiserror::Error;

use duka_core::types::Journey;
use duka_llm::classify::IntentResult;
use duka_sessions::types::Customer;
use duka_sessions::ConversationState;
use duka_tools::{ToolContext, ToolError, Tools};

use crate::action::BotAction;

#[derive(Debug, Error)]
pub enum SubflowError {
    #[error("tool failure: {0}")]
    Tool(#[from] ToolError),

    /// The subflow wants a human. Reason feeds the handoff ticket.
    #[error("escalation requested: {reason}")]
    Escalate { reason: String },
}

/// Everything a subflow may look at. Mutating the world goes through
/// `tools`; mutating the conversation goes through `state`.
pub struct SubflowInput<'a> {
    pub state: &'a mut ConversationState,
    pub tools: &'a Tools,
    pub ctx: ToolContext,
    pub intent: IntentResult,
    pub message: &'a str,
    pub customer: &'a Customer,
    pub kb_score_threshold: f64,
}

/// The journey dispatch table. Exhaustive over [`Journey`] — a new journey
/// without a subflow is a compile error.
pub async fn dispatch(
    journey: Journey,
    input: &mut SubflowInput<'_>,
) -> Result<BotAction, SubflowError> {
    match journey {
        Journey::Sales => sales::run(input).await,
        Journey::Orders => orders::run(input).await,
        Journey::Support => support::run(input).await,
        Journey::Offers => offers::run(input).await,
        Journey::Prefs => prefs::run(input).await,
        Journey::Payments => payments::run(input).await,
        Journey::Booking => booking::run(input).await,
        Journey::Governance => governance::run(input).await,
    }
}

/// Shared helper: read a string slot.
pub(crate) fn slot_str<'a>(input: &'a SubflowInput<'_>, key: &str) -> Option<&'a str> {
    input.intent.slots.get(key).and_then(|v| v.as_str())
}

pub(crate) fn slot_i64(input: &SubflowInput<'_>, key: &str) -> Option<i64> {
    input.intent.slots.get(key).and_then(|v| v.as_i64())
}

pub(crate) fn slot_bool(input: &SubflowInput<'_>, key: &str) -> Option<bool> {
    input.intent.slots.get(key).and_then(|v| v.as_bool())
}

/// Format cents as a customer-facing KES amount.
pub(crate) fn kes(cents: i64) -> String {
    format!("KES {}", cents / 100)
}
