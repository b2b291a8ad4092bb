use tracing::{info, instrument, warn};

use duka_core::types::{GovernorClass, Intent, Journey, MessageKind};
use duka_llm::classify::{casual_allowance, Classifiers, RecommendedAction};
use duka_llm::provider::ChatMessage;
use duka_sessions::types::{Conversation, Customer};
use duka_sessions::ConversationState;
use duka_tools::{ToolContext, ToolError, Tools};

use crate::action::BotAction;
use crate::escalate;
use crate::router::{self, Routing};
use crate::state::TurnState;
use crate::subflows::{self, SubflowError, SubflowInput};

/// Spam turns tolerated before the bot goes quiet.
const SPAM_DISENGAGE_AFTER: u32 = 2;

/// Per-turn configuration resolved from tenant settings and global defaults.
#[derive(Debug, Clone)]
pub struct TurnKnobs {
    pub kb_score_threshold: f64,
    pub request_human_closes: bool,
}

impl Default for TurnKnobs {
    fn default() -> Self {
        Self {
            kb_score_threshold: 0.6,
            request_human_closes: false,
        }
    }
}

/// What a completed turn asks the caller to do: deliver the action (if any),
/// persist the state, and apply the bookkeeping flags to the Conversation.
#[derive(Debug)]
pub struct TurnOutcome {
    pub action: Option<BotAction>,
    pub next_state: TurnState,
    pub message_kind: MessageKind,
    pub escalated: bool,
    pub close_conversation: bool,
    pub clarifying: bool,
    pub tool_failed: bool,
    pub stop_processed: bool,
}

impl TurnOutcome {
    fn reply(action: BotAction) -> Self {
        Self {
            action: Some(action),
            next_state: TurnState::AwaitingCustomer,
            message_kind: MessageKind::BotResponse,
            escalated: false,
            close_conversation: false,
            clarifying: false,
            tool_failed: false,
            stop_processed: false,
        }
    }

    fn silent() -> Self {
        Self {
            action: None,
            next_state: TurnState::AwaitingCustomer,
            message_kind: MessageKind::BotResponse,
            escalated: false,
            close_conversation: false,
            clarifying: false,
            tool_failed: false,
            stop_processed: false,
        }
    }
}

/// Run one full conversational turn: governor → language → intent →
/// threshold routing → subflow → action.
///
/// The caller holds the per-conversation lock, applies the outcome to the
/// Conversation row, saves the state, and hands the action to the outbound
/// formatter. The turn budget is enforced by the caller's timeout.
#[instrument(
    skip_all,
    fields(
        tenant_id = %state.tenant_id,
        conversation_id = %state.conversation_id,
        request_id = %state.request_id,
    )
)]
pub async fn run_turn(
    state: &mut ConversationState,
    conversation: &Conversation,
    customer: &Customer,
    tools: &Tools,
    classifiers: &Classifiers,
    message: &str,
    history: &[ChatMessage],
    knobs: &TurnKnobs,
) -> TurnOutcome {
    state.begin_turn();
    let ctx = ToolContext::new(&state.tenant_id, &state.request_id, &state.conversation_id);

    // STOP is processed immediately, before any classifier or other side
    // effect, and its confirmation is transactional (always deliverable).
    if is_stop_keyword(message) {
        return match tools.customer_revoke_messaging(&ctx, &customer.id) {
            Ok(()) => {
                info!("STOP processed; consents revoked");
                TurnOutcome {
                    action: Some(BotAction::text(
                        "You won't receive reminders or offers from us anymore. \
                         Reply START anytime to opt back in.",
                    )),
                    message_kind: MessageKind::AutomatedTransactional,
                    stop_processed: true,
                    ..TurnOutcome::silent()
                }
            }
            Err(e) => {
                warn!(error = %e, "consent revocation failed");
                TurnOutcome {
                    tool_failed: true,
                    action: Some(apology(state)),
                    ..TurnOutcome::silent()
                }
            }
        };
    }

    // Conversation governor: business / casual / spam / abuse.
    let governor = classifiers.governor(history, message).await;
    state.signals.governor_classification = Some(governor.classification);
    state.signals.governor_confidence = governor.confidence;

    match governor.classification {
        GovernorClass::Abuse => {
            warn!("abusive message; stopping engagement");
            return TurnOutcome {
                close_conversation: true,
                next_state: TurnState::Closed,
                ..TurnOutcome::silent()
            };
        }
        GovernorClass::Spam => {
            state.spam_turns += 1;
            if state.spam_turns > SPAM_DISENGAGE_AFTER {
                info!(spam_turns = state.spam_turns, "spam threshold passed; disengaging");
                return TurnOutcome::silent();
            }
        }
        GovernorClass::Casual => {
            state.casual_turns += 1;
            let allowance = casual_allowance(state.persona.max_chattiness_level);
            if state.casual_turns > allowance {
                return TurnOutcome::reply(BotAction::text(format!(
                    "Happy to chat! Meanwhile — can I help you find something from {}?",
                    state.persona.bot_name
                )));
            }
        }
        GovernorClass::Business => {}
    }

    // Frustration combined with an unresolved conversation goes to a human
    // rather than another bot loop.
    if governor.recommended_action == RecommendedAction::Handoff && state.turn_count > 2 {
        return escalate_now(
            state,
            tools,
            &ctx,
            "frustration detected with unresolved conversation",
            knobs,
        );
    }

    // Language policy for this turn: explicit customer preference wins,
    // then a confident detection in an allowed language, then the default.
    let language = classifiers.language(history, message).await;
    state.signals.language_confidence = language.confidence;
    let decided = duka_llm::classify::language::decide(
        &language,
        customer.language_pref.as_deref(),
        &state.persona.allowed_languages,
        &state.persona.default_language,
    );
    state.signals.response_language = decided.parse().ok();

    // Intent classification with validated output.
    let intent = classifiers.intent(history, message).await;
    state.signals.intent = Some(intent.intent);
    state.signals.intent_confidence = intent.confidence;
    state.signals.slots = intent.slots.clone();

    // Escalation triggers beat routing.
    if let Some(reason) = escalate::trigger(state, conversation, &intent, message) {
        return escalate_now(state, tools, &ctx, &reason, knobs);
    }

    let active_journey = state.signals.journey;
    match router::route(&intent, active_journey) {
        Routing::Clarify => {
            let question = clarifying_question(&intent);
            TurnOutcome {
                clarifying: true,
                ..TurnOutcome::reply(question)
            }
        }
        Routing::Unknown => {
            let mut input = SubflowInput {
                state,
                tools,
                ctx,
                intent,
                message,
                customer,
                kb_score_threshold: knobs.kb_score_threshold,
            };
            match subflows::governance::run(&mut input).await {
                Ok(action) => finish(state, action),
                Err(SubflowError::Escalate { reason }) => {
                    let ctx =
                        ToolContext::new(&state.tenant_id, &state.request_id, &state.conversation_id);
                    escalate_now(state, tools, &ctx, &reason, knobs)
                }
                Err(SubflowError::Tool(e)) => tool_failure(state, e),
            }
        }
        Routing::Execute(journey) => {
            state.signals.journey = Some(journey);
            let ctx_clone = ctx.clone();
            let mut input = SubflowInput {
                state,
                tools,
                ctx,
                intent,
                message,
                customer,
                kb_score_threshold: knobs.kb_score_threshold,
            };
            match subflows::dispatch(journey, &mut input).await {
                Ok(action) => finish(state, action),
                Err(SubflowError::Escalate { reason }) => {
                    escalate_now(state, tools, &ctx_clone, &reason, knobs)
                }
                Err(SubflowError::Tool(e)) => tool_failure(state, e),
            }
        }
    }
}

fn finish(state: &mut ConversationState, action: BotAction) -> TurnOutcome {
    if let BotAction::Text { ref body } = action {
        state.response_text = Some(body.clone());
    }
    TurnOutcome::reply(action)
}

fn escalate_now(
    state: &mut ConversationState,
    tools: &Tools,
    ctx: &ToolContext,
    reason: &str,
    knobs: &TurnKnobs,
) -> TurnOutcome {
    match escalate::perform(state, tools, ctx, reason) {
        Ok(action) => TurnOutcome {
            escalated: true,
            close_conversation: knobs.request_human_closes,
            next_state: if knobs.request_human_closes {
                TurnState::Closed
            } else {
                TurnState::Handoff
            },
            ..TurnOutcome::reply(action)
        },
        Err(e) => {
            warn!(error = %e, "handoff ticket creation failed");
            tool_failure(state, e)
        }
    }
}

/// Permanent tool failure: a non-leaking, tenant-branded apology. The caller
/// bumps the tool-error streak; two in a row escalate on the next turn.
fn tool_failure(state: &mut ConversationState, error: ToolError) -> TurnOutcome {
    warn!(error = %error, "subflow tool failure");
    TurnOutcome {
        tool_failed: true,
        ..TurnOutcome::reply(apology(state))
    }
}

fn apology(state: &ConversationState) -> BotAction {
    BotAction::text(format!(
        "Sorry — something went wrong on our side just now. {} will sort it out; \
         please try again in a little while.",
        state.persona.bot_name
    ))
}

/// Exactly one clarifying question, tied to what the classifier suspected.
fn clarifying_question(intent: &duka_llm::classify::IntentResult) -> BotAction {
    let hint = match router::journey_for_intent(intent.intent) {
        Journey::Sales => "browse our products",
        Journey::Orders => "check on an order",
        Journey::Support => "get help with a question",
        Journey::Offers => "see current offers",
        Journey::Payments => "make a payment",
        Journey::Booking => "book an appointment",
        Journey::Prefs => "change your preferences",
        Journey::Governance => "do something else",
    };
    BotAction::Buttons {
        body: format!("Just to be sure — would you like to {}?", hint),
        buttons: vec!["Yes".to_string(), "No, something else".to_string()],
    }
}

/// STOP keywords processed without any classifier involvement.
fn is_stop_keyword(message: &str) -> bool {
    let m = message.trim().to_lowercase();
    matches!(m.as_str(), "stop" | "unsubscribe" | "stop messages" | "acha" | "usinitumie")
}

/// Whether intent was strong enough that the customer's message counts as a
/// business interaction (used by analytics; kept here so the rule lives next
/// to the thresholds).
pub fn is_low_confidence(intent: Option<Intent>, confidence: f64) -> bool {
    intent.is_none() || confidence < duka_llm::classify::INTENT_CLARIFY_THRESHOLD
}
