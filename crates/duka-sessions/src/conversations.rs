use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use duka_core::types::{ConversationStatus, MessageDirection, MessageKind};

use crate::error::{Result, SessionError};
use crate::types::{Conversation, Message, NewMessage};

/// Return the single non-closed conversation for (tenant, customer), creating
/// one in `bot` status if none exists. Closing a conversation and receiving a
/// new message therefore opens a fresh one.
pub fn get_or_open(conn: &Connection, tenant_id: &str, customer_id: &str) -> Result<Conversation> {
    if let Some(c) = find_active(conn, tenant_id, customer_id)? {
        return Ok(c);
    }

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO conversations (id, tenant_id, customer_id, status, created_at, updated_at)
         SELECT ?1, ?2, ?3, 'bot', ?4, ?4
         WHERE NOT EXISTS (
             SELECT 1 FROM conversations
             WHERE tenant_id = ?2 AND customer_id = ?3 AND status != 'closed'
         )",
        params![id, tenant_id, customer_id, now],
    )?;

    // Read back whichever row won — ours or a concurrent opener's.
    find_active(conn, tenant_id, customer_id)?.ok_or(SessionError::ConversationNotFound {
        id: id.clone(),
    })
}

pub fn find_active(
    conn: &Connection,
    tenant_id: &str,
    customer_id: &str,
) -> Result<Option<Conversation>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM conversations
         WHERE tenant_id = ?1 AND customer_id = ?2 AND status != 'closed'
         ORDER BY created_at DESC LIMIT 1",
    )?;
    Ok(stmt
        .query_row(params![tenant_id, customer_id], row_to_conversation)
        .optional()?)
}

pub fn get(conn: &Connection, tenant_id: &str, conversation_id: &str) -> Result<Option<Conversation>> {
    let mut stmt =
        conn.prepare("SELECT * FROM conversations WHERE tenant_id = ?1 AND id = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, conversation_id], row_to_conversation)
        .optional()?)
}

/// Recent conversations for the operator inbox, optionally filtered by
/// status, newest activity first.
pub fn list_for_tenant(
    conn: &Connection,
    tenant_id: &str,
    status: Option<ConversationStatus>,
    limit: usize,
) -> Result<Vec<Conversation>> {
    let status_pattern = status.map(|s| s.to_string()).unwrap_or_else(|| "%".to_string());
    let mut stmt = conn.prepare(
        "SELECT * FROM conversations
         WHERE tenant_id = ?1 AND status LIKE ?2
         ORDER BY updated_at DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![tenant_id, status_pattern, limit as i64],
        row_to_conversation,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn set_status(
    conn: &Connection,
    tenant_id: &str,
    conversation_id: &str,
    status: ConversationStatus,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE conversations SET status = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            conversation_id,
            status.to_string(),
            Utc::now().to_rfc3339()
        ],
    )?;
    if n == 0 {
        return Err(SessionError::ConversationNotFound {
            id: conversation_id.to_string(),
        });
    }
    info!(tenant_id, conversation_id, status = %status, "conversation status changed");
    Ok(())
}

/// An operator takes over a conversation in handoff.
pub fn claim(
    conn: &Connection,
    tenant_id: &str,
    conversation_id: &str,
    operator_id: &str,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE conversations SET operator_id = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2 AND status = 'handoff'",
        params![
            tenant_id,
            conversation_id,
            operator_id,
            Utc::now().to_rfc3339()
        ],
    )?;
    if n == 0 {
        return Err(SessionError::ConversationNotFound {
            id: conversation_id.to_string(),
        });
    }
    Ok(())
}

/// Release back to automated handling.
pub fn release(conn: &Connection, tenant_id: &str, conversation_id: &str) -> Result<()> {
    let n = conn.execute(
        "UPDATE conversations SET operator_id = NULL, status = 'bot', updated_at = ?3
         WHERE tenant_id = ?1 AND id = ?2",
        params![tenant_id, conversation_id, Utc::now().to_rfc3339()],
    )?;
    if n == 0 {
        return Err(SessionError::ConversationNotFound {
            id: conversation_id.to_string(),
        });
    }
    Ok(())
}

pub fn set_last_intent(
    conn: &Connection,
    tenant_id: &str,
    conversation_id: &str,
    intent: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET last_intent = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            conversation_id,
            intent,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Relative counter updates — the storage layer does the arithmetic so
/// parallel turns never lose increments.
pub fn bump_counter(
    conn: &Connection,
    tenant_id: &str,
    conversation_id: &str,
    counter: ConversationCounter,
) -> Result<()> {
    let column = counter.column();
    let sql = format!(
        "UPDATE conversations SET {col} = {col} + 1, updated_at = ?3
         WHERE tenant_id = ?1 AND id = ?2",
        col = column
    );
    conn.execute(
        &sql,
        params![tenant_id, conversation_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn reset_tool_error_streak(
    conn: &Connection,
    tenant_id: &str,
    conversation_id: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET tool_error_streak = 0 WHERE tenant_id = ?1 AND id = ?2",
        params![tenant_id, conversation_id],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum ConversationCounter {
    Turns,
    LowConfidence,
    Clarify,
    ToolErrorStreak,
}

impl ConversationCounter {
    fn column(&self) -> &'static str {
        match self {
            ConversationCounter::Turns => "turn_count",
            ConversationCounter::LowConfidence => "low_confidence_count",
            ConversationCounter::Clarify => "clarify_count",
            ConversationCounter::ToolErrorStreak => "tool_error_streak",
        }
    }
}

// ── messages ─────────────────────────────────────────────────────────────────

/// Append one message. Messages are immutable once written; delivery status
/// is the only column that changes afterwards.
pub fn append_message(conn: &Connection, msg: NewMessage<'_>) -> Result<Message> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages
         (id, tenant_id, conversation_id, direction, kind, body, payload,
          provider_message_id, template_ref, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        params![
            id,
            msg.tenant_id,
            msg.conversation_id,
            msg.direction.to_string(),
            msg.kind.to_string(),
            msg.body,
            msg.payload.map(|p| p.to_string()),
            msg.provider_message_id,
            msg.template_ref,
            now,
        ],
    )?;
    let message = conn.query_row(
        "SELECT * FROM messages WHERE id = ?1",
        params![id],
        row_to_message,
    )?;
    Ok(message)
}

/// Internal lookup by primary key, used by the worker to load the message a
/// job refers to. Tenant scoping is re-established from the row itself.
pub fn get_message(conn: &Connection, message_id: &str) -> Result<Option<Message>> {
    let mut stmt = conn.prepare("SELECT * FROM messages WHERE id = ?1")?;
    Ok(stmt
        .query_row(params![message_id], row_to_message)
        .optional()?)
}

/// Attach the gateway's message id once the send is accepted, so delivery
/// receipts can find their row.
pub fn set_provider_message_id(
    conn: &Connection,
    message_id: &str,
    provider_message_id: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE messages SET provider_message_id = ?2 WHERE id = ?1",
        params![message_id, provider_message_id],
    )?;
    Ok(())
}

/// Delivery receipt from the gateway, recorded against the original message.
pub fn set_delivery_status(
    conn: &Connection,
    provider_message_id: &str,
    status: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE messages SET delivery_status = ?2 WHERE provider_message_id = ?1",
        params![provider_message_id, status],
    )?;
    Ok(())
}

/// Last `limit` messages in chronological order — the history window the
/// classifier prompt is rebuilt from.
pub fn history(
    conn: &Connection,
    tenant_id: &str,
    conversation_id: &str,
    limit: usize,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM (
             SELECT * FROM messages
             WHERE tenant_id = ?1 AND conversation_id = ?2
             ORDER BY created_at DESC LIMIT ?3
         ) ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(
        params![tenant_id, conversation_id, limit as i64],
        row_to_message,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn count_messages(conn: &Connection, tenant_id: &str, conversation_id: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE tenant_id = ?1 AND conversation_id = ?2",
        params![tenant_id, conversation_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Append-only record of one classified turn, for the analytics joins.
pub fn record_intent_event(
    conn: &Connection,
    tenant_id: &str,
    conversation_id: &str,
    intent: &str,
    confidence: f64,
    journey: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO intent_events
         (tenant_id, conversation_id, intent, confidence, journey, created_at)
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            tenant_id,
            conversation_id,
            intent,
            confidence,
            journey,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;
    Ok(Conversation {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        customer_id: row.get("customer_id")?,
        status: ConversationStatus::from_str(&status).unwrap_or(ConversationStatus::Closed),
        channel: row.get("channel")?,
        last_intent: row.get("last_intent")?,
        operator_id: row.get("operator_id")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        turn_count: row.get::<_, i64>("turn_count")? as u32,
        low_confidence_count: row.get::<_, i64>("low_confidence_count")? as u32,
        clarify_count: row.get::<_, i64>("clarify_count")? as u32,
        tool_error_streak: row.get::<_, i64>("tool_error_streak")? as u32,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let direction: String = row.get("direction")?;
    let kind: String = row.get("kind")?;
    let payload: Option<String> = row.get("payload")?;
    Ok(Message {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        conversation_id: row.get("conversation_id")?,
        direction: if direction == "in" {
            MessageDirection::In
        } else {
            MessageDirection::Out
        },
        kind: MessageKind::from_str(&kind).unwrap_or(MessageKind::BotResponse),
        body: row.get("body")?,
        payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
        provider_message_id: row.get("provider_message_id")?,
        delivery_status: row.get("delivery_status")?,
        template_ref: row.get("template_ref")?,
        created_at: row.get("created_at")?,
    })
}
