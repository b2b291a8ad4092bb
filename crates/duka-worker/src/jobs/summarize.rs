use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use tracing::warn;

use duka_llm::provider::{ChatMessage, CompletionRequest, LlmProvider, Role};
use duka_sessions::{conversations, StateStore};

use crate::engine::JobHandler;

/// Regenerates the rolling conversation summary from the history window and
/// accumulated key facts. Runs on the analytics queue every N messages.
pub struct SummarizeConversation {
    db: Arc<Mutex<Connection>>,
    store: Arc<StateStore>,
    llm: Arc<dyn LlmProvider>,
    history_window: usize,
}

impl SummarizeConversation {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        store: Arc<StateStore>,
        llm: Arc<dyn LlmProvider>,
        history_window: usize,
    ) -> Self {
        Self {
            db,
            store,
            llm,
            history_window,
        }
    }
}

#[async_trait]
impl JobHandler for SummarizeConversation {
    fn kind(&self) -> &'static str {
        "summarize_conversation"
    }

    async fn run(&self, payload: &Value) -> Result<(), String> {
        let tenant_id = payload
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "payload missing tenant_id".to_string())?;
        let conversation_id = payload
            .get("conversation_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "payload missing conversation_id".to_string())?;

        let (history, count) = {
            let conn = self.db.lock().unwrap();
            let history =
                conversations::history(&conn, tenant_id, conversation_id, self.history_window)
                    .map_err(|e| e.to_string())?;
            let count = conversations::count_messages(&conn, tenant_id, conversation_id)
                .map_err(|e| e.to_string())?;
            (history, count)
        };
        let facts = self
            .store
            .key_facts(conversation_id)
            .map_err(|e| e.to_string())?;

        let transcript = history
            .iter()
            .map(|m| format!("{}: {}", m.direction, m.body))
            .collect::<Vec<_>>()
            .join("\n");
        let fact_lines = facts
            .iter()
            .map(|f| format!("- {}", f.fact))
            .collect::<Vec<_>>()
            .join("\n");

        let req = CompletionRequest {
            system: "Summarize this customer conversation for a support agent in at most \
                     five sentences. Facts already known are listed; do not repeat them \
                     verbatim, fold them in."
                .to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: format!("Known facts:\n{}\n\nTranscript:\n{}", fact_lines, transcript),
            }],
            max_tokens: 300,
            json_mode: false,
        };

        let summary = match self.llm.complete(&req).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                // Degrade to the raw fact list rather than failing the job —
                // a summary is an aid, not a dependency.
                warn!(error = %e, "summary LLM call failed; using fact list");
                if fact_lines.is_empty() {
                    return Ok(());
                }
                fact_lines.clone()
            }
        };

        self.store
            .set_summary(conversation_id, &summary, count)
            .map_err(|e| e.to_string())
    }
}
