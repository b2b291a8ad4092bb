use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, instrument, warn};

use duka_core::types::{ConversationStatus, MessageDirection, MessageKind};
use duka_journey::{run_turn, BotAction, TurnKnobs};
use duka_llm::classify::Classifiers;
use duka_llm::provider::{ChatMessage, Role};
use duka_outbound::{to_payloads, Deliverer, DeliveryError};
use duka_sessions::conversations::{self, ConversationCounter};
use duka_sessions::types::NewMessage;
use duka_sessions::{customers, StateStore};
use duka_tenancy::TenantStore;
use duka_tools::Tools;

use crate::engine::{JobHandler, QueueHandle};
use crate::types::Queue;

/// Pipeline-level settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub merge_window: Duration,
    pub turn_budget: Duration,
    pub history_window: usize,
    pub summary_every_messages: u32,
    pub default_kb_score_threshold: f64,
    pub request_human_closes: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            merge_window: Duration::from_secs(2),
            turn_budget: Duration::from_secs(duka_core::config::TURN_BUDGET_SECS),
            history_window: 20,
            summary_every_messages: 20,
            default_kb_score_threshold: 0.6,
            request_human_closes: false,
        }
    }
}

/// Everything one conversational turn needs, wired once and shared by the
/// messaging workers.
pub struct Pipeline {
    db: Arc<Mutex<Connection>>,
    tenants: Arc<TenantStore>,
    tools: Arc<Tools>,
    classifiers: Arc<Classifiers>,
    deliverer: Arc<Deliverer>,
    store: Arc<StateStore>,
    queue: QueueHandle,
    settings: PipelineSettings,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Mutex<Connection>>,
        tenants: Arc<TenantStore>,
        tools: Arc<Tools>,
        classifiers: Arc<Classifiers>,
        deliverer: Arc<Deliverer>,
        store: Arc<StateStore>,
        queue: QueueHandle,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            db,
            tenants,
            tools,
            classifiers,
            deliverer,
            store,
            queue,
            settings,
        }
    }

    /// Process one inbound message end to end: lock, classify, execute,
    /// format, deliver. Errors bubble as strings for the engine's retry
    /// policy; everything already-applied is safe to re-run (dedup keys on
    /// the outbound side, idempotent upserts elsewhere).
    #[instrument(skip(self), fields(message_id))]
    pub async fn process(&self, message_id: &str) -> Result<(), String> {
        // Load the message and its conversation context.
        let (message, conversation, customer, tenant) = {
            let conn = self.db.lock().unwrap();
            let message = conversations::get_message(&conn, message_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("message {} not found", message_id))?;
            let conversation =
                conversations::get(&conn, &message.tenant_id, &message.conversation_id)
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| "conversation not found".to_string())?;
            let customer = customers::get(&conn, &message.tenant_id, &conversation.customer_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "customer not found".to_string())?;
            drop(conn);
            let tenant = self
                .tenants
                .get(&message.tenant_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "tenant not found".to_string())?;
            (message, conversation, customer, tenant)
        };

        // While in handoff (or closed) the pipeline stays out of the way.
        if matches!(
            conversation.status,
            ConversationStatus::Handoff | ConversationStatus::Closed
        ) {
            info!(conversation_id = %conversation.id, status = %conversation.status,
                  "pipeline suspended; message logged only");
            return Ok(());
        }

        // Merge-or-queue under the per-conversation lock. A message arriving
        // within the merge window of an in-flight turn joins that turn.
        if self.store.turn_in_flight(&conversation.id) {
            let age = message_age_secs(&message.created_at);
            if age <= self.settings.merge_window.as_secs() {
                self.store
                    .merge_into_turn(&conversation.id, message.body.clone());
                info!(conversation_id = %conversation.id, "message merged into in-flight turn");
                return Ok(());
            }
        }
        let _guard = self
            .store
            .lock_turn(&conversation.id)
            .await
            .map_err(|e| e.to_string())?;

        let mut state = self
            .store
            .load(
                &tenant.id,
                &conversation.id,
                &customer.id,
                &customer.phone_e164,
                &tenant.persona,
            )
            .map_err(|e| e.to_string())?;
        state.prefs.language_pref = customer.language_pref.clone();
        state.prefs.marketing_opt_in = customer.marketing_opt_in;

        // History window for the classifier prompt.
        let history: Vec<ChatMessage> = {
            let conn = self.db.lock().unwrap();
            conversations::history(
                &conn,
                &tenant.id,
                &conversation.id,
                self.settings.history_window,
            )
            .map_err(|e| e.to_string())?
            .iter()
            .map(|m| ChatMessage {
                role: if m.direction == MessageDirection::Out {
                    Role::Assistant
                } else {
                    Role::User
                },
                content: m.body.clone(),
            })
            .collect()
        };

        // Merge any messages that raced in before we took the lock.
        let mut text = message.body.clone();
        for merged in self.store.drain_merged(&conversation.id) {
            text.push('\n');
            text.push_str(&merged);
        }

        let knobs = TurnKnobs {
            kb_score_threshold: tenant
                .kb_score_threshold
                .unwrap_or(self.settings.default_kb_score_threshold),
            request_human_closes: self.settings.request_human_closes,
        };

        // The turn budget caps classify + tools + formatting.
        let outcome = match tokio::time::timeout(
            self.settings.turn_budget,
            run_turn(
                &mut state,
                &conversation,
                &customer,
                &self.tools,
                &self.classifiers,
                &text,
                &history,
                &knobs,
            ),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(conversation_id = %conversation.id, "turn budget exceeded");
                budget_exceeded_outcome(&state)
            }
        };

        // Bookkeeping on the conversation row — all relative updates.
        {
            let conn = self.db.lock().unwrap();
            conversations::bump_counter(&conn, &tenant.id, &conversation.id, ConversationCounter::Turns)
                .map_err(|e| e.to_string())?;
            if outcome.clarifying {
                conversations::bump_counter(
                    &conn,
                    &tenant.id,
                    &conversation.id,
                    ConversationCounter::Clarify,
                )
                .map_err(|e| e.to_string())?;
            }
            if duka_journey::turn::is_low_confidence(
                state.signals.intent,
                state.signals.intent_confidence,
            ) {
                conversations::bump_counter(
                    &conn,
                    &tenant.id,
                    &conversation.id,
                    ConversationCounter::LowConfidence,
                )
                .map_err(|e| e.to_string())?;
            }
            if outcome.tool_failed {
                conversations::bump_counter(
                    &conn,
                    &tenant.id,
                    &conversation.id,
                    ConversationCounter::ToolErrorStreak,
                )
                .map_err(|e| e.to_string())?;
            } else {
                conversations::reset_tool_error_streak(&conn, &tenant.id, &conversation.id)
                    .map_err(|e| e.to_string())?;
            }
            if let Some(intent) = state.signals.intent {
                conversations::set_last_intent(
                    &conn,
                    &tenant.id,
                    &conversation.id,
                    intent.as_str(),
                )
                .map_err(|e| e.to_string())?;
                conversations::record_intent_event(
                    &conn,
                    &tenant.id,
                    &conversation.id,
                    intent.as_str(),
                    state.signals.intent_confidence,
                    state.signals.journey.map(|j| j.as_str()),
                )
                .map_err(|e| e.to_string())?;
            }

            let next_status = if outcome.close_conversation {
                Some(ConversationStatus::Closed)
            } else if outcome.escalated {
                Some(ConversationStatus::Handoff)
            } else if conversation.status == ConversationStatus::Open {
                Some(ConversationStatus::Bot)
            } else {
                None
            };
            if let Some(status) = next_status {
                conversations::set_status(&conn, &tenant.id, &conversation.id, status)
                    .map_err(|e| e.to_string())?;
            }
            customers::touch_last_seen(&conn, &tenant.id, &customer.id)
                .map_err(|e| e.to_string())?;
        }

        self.store.save(&state).map_err(|e| e.to_string())?;

        // Deliver the reply, if the turn produced one.
        if let Some(action) = outcome.action {
            self.deliver_reply(&tenant, &customer, &conversation.id, &state, &action, outcome.message_kind)
                .await?;
        }

        // A fresh booking schedules its reminder, deduped on
        // (appointment, offset) so a replayed turn cannot double-book it.
        if let Some(ref booked) = state.booked_appointment {
            if let Some(remind_at) = reminder_instant(&booked.scheduled_for) {
                let _ = crate::jobs::reminders::schedule_reminder(
                    &self.queue,
                    &tenant.id,
                    &booked.appointment_id,
                    remind_at,
                    "24h",
                );
            }
        }

        // Periodic summarization.
        let count = {
            let conn = self.db.lock().unwrap();
            conversations::count_messages(&conn, &tenant.id, &conversation.id)
                .map_err(|e| e.to_string())?
        };
        if count > 0 && count % self.settings.summary_every_messages as u64 == 0 {
            let _ = self.queue.enqueue(
                Queue::Analytics,
                "summarize_conversation",
                &serde_json::json!({
                    "tenant_id": tenant.id,
                    "conversation_id": conversation.id,
                }),
                3,
                Some(&format!("summary:{}:{}", conversation.id, count)),
                None,
            );
        }

        // Evict closed conversations' state.
        if outcome.close_conversation {
            let _ = self.store.evict(&tenant.id, &conversation.id);
        }

        Ok(())
    }

    async fn deliver_reply(
        &self,
        tenant: &duka_tenancy::types::Tenant,
        customer: &duka_sessions::types::Customer,
        conversation_id: &str,
        state: &duka_sessions::ConversationState,
        action: &BotAction,
        kind: MessageKind,
    ) -> Result<(), String> {
        let payloads = to_payloads(action);

        // Record the outbound message before the send; the delivery dedup
        // key keeps a retried job from double-sending.
        let outbound = {
            let conn = self.db.lock().unwrap();
            conversations::append_message(
                &conn,
                NewMessage {
                    tenant_id: &tenant.id,
                    conversation_id,
                    direction: MessageDirection::Out,
                    kind,
                    body: &action_text(action),
                    payload: Some(&serde_json::to_value(&payloads).map_err(|e| e.to_string())?),
                    provider_message_id: None,
                    template_ref: None,
                },
            )
            .map_err(|e| e.to_string())?
        };

        let creds = self.tenants.credentials(tenant).map_err(|e| e.to_string())?;
        match self
            .deliverer
            .send_turn(
                tenant,
                &creds,
                customer,
                conversation_id,
                state.turn_count,
                kind,
                &payloads,
            )
            .await
        {
            Ok(receipts) => {
                // Attach the first accepted provider id so the gateway's
                // delivery-receipt callback can find this row.
                if let Some(receipt) = receipts.iter().find(|r| r.sent) {
                    let conn = self.db.lock().unwrap();
                    let _ = conversations::set_provider_message_id(
                        &conn,
                        &outbound.id,
                        &receipt.provider_message_id,
                    );
                }
                Ok(())
            }
            Err(DeliveryError::Deferred { until }) => {
                warn!(conversation_id, %until, "reply deferred by send gates");
                Ok(())
            }
            Err(e) => {
                // DELIVERY_FAILED: keep the turn committed, surface for retry
                // via the job runtime.
                Err(format!("delivery failed: {}", e))
            }
        }
    }
}

/// 24 hours before the appointment, or skip when the timestamp is
/// unparseable or already too close.
fn reminder_instant(scheduled_for: &str) -> Option<chrono::DateTime<Utc>> {
    let scheduled = chrono::DateTime::parse_from_rfc3339(scheduled_for)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(scheduled_for, "%Y-%m-%dT%H:%M")
                .map(|n| chrono::DateTime::<Utc>::from_naive_utc_and_offset(n, Utc))
        })
        .ok()?;
    let remind_at = scheduled - chrono::Duration::hours(24);
    (remind_at > Utc::now()).then_some(remind_at)
}

fn message_age_secs(created_at: &str) -> u64 {
    chrono::DateTime::parse_from_rfc3339(created_at)
        .map(|t| (Utc::now() - t.with_timezone(&Utc)).num_seconds().max(0) as u64)
        .unwrap_or(u64::MAX)
}

/// Budget exhaustion: a graceful apology and an escalation-candidate mark.
fn budget_exceeded_outcome(state: &duka_sessions::ConversationState) -> duka_journey::TurnOutcome {
    duka_journey::TurnOutcome {
        action: Some(BotAction::text(format!(
            "Sorry for the wait — this is taking longer than it should. {} will \
             follow up shortly.",
            state.persona.bot_name
        ))),
        next_state: duka_journey::TurnState::AwaitingCustomer,
        message_kind: MessageKind::BotResponse,
        escalated: false,
        close_conversation: false,
        clarifying: false,
        tool_failed: true,
        stop_processed: false,
    }
}

fn action_text(action: &BotAction) -> String {
    match action {
        BotAction::Text { body } => body.clone(),
        BotAction::Handoff { body, .. } => body.clone(),
        BotAction::Buttons { body, .. } => body.clone(),
        BotAction::List { header, .. } => header.clone(),
        BotAction::ProductCards { intro, .. } => intro.clone(),
    }
}

/// Job-handler wrapper for the messaging queue.
pub struct ProcessInboundMessage {
    pipeline: Arc<Pipeline>,
}

impl ProcessInboundMessage {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for ProcessInboundMessage {
    fn kind(&self) -> &'static str {
        "process_inbound_message"
    }

    async fn run(&self, payload: &Value) -> Result<(), String> {
        let message_id = payload
            .get("message_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "payload missing message_id".to_string())?;
        self.pipeline.process(message_id).await
    }
}
