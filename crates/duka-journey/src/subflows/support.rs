use duka_sessions::state::KbSnippet;
use duka_tools::{with_retry, ToolError};

use crate::action::BotAction;

use super::{slot_str, SubflowError, SubflowInput};

const RETRIEVE_K: usize = 4;

/// Grounded support answers from the tenant's knowledge base. No hit above
/// the tenant threshold means escalation, not improvisation.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    let query = slot_str(input, "question")
        .map(str::to_string)
        .unwrap_or_else(|| input.message.to_string());

    let tools = input.tools;
    let ctx = input.ctx.clone();
    let hits = with_retry("kb_retrieve", || {
        let ctx = ctx.clone();
        let query = query.clone();
        async move { tools.kb_retrieve(&ctx, &query, RETRIEVE_K) }
    })
    .await;

    let hits = match hits {
        Ok(h) => h,
        Err(ToolError::Retryable(reason)) => {
            return Err(SubflowError::Escalate {
                reason: format!("knowledge base unavailable: {}", reason),
            })
        }
        Err(e) => return Err(SubflowError::Tool(e)),
    };

    let grounded: Vec<_> = hits
        .into_iter()
        .filter(|h| h.score >= input.kb_score_threshold)
        .collect();

    if grounded.is_empty() {
        return Err(SubflowError::Escalate {
            reason: "no grounded answer in knowledge base".to_string(),
        });
    }

    input.state.kb_snippets = grounded
        .iter()
        .map(|h| KbSnippet {
            snippet: h.snippet.clone(),
            score: h.score,
            source: h.source.clone(),
        })
        .collect();

    // The answer is the best snippet verbatim, lightly framed. The framing
    // adds no facts of its own.
    let top = &grounded[0];
    Ok(BotAction::text(format!(
        "{}\n\nIs there anything else you'd like to know?",
        top.snippet.trim()
    )))
}
