use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::contract::{ToolContext, ToolError, ToolResult};

/// Context snapshot frozen into a handoff ticket so the operator sees where
/// the bot left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffSnapshot {
    pub tenant_id: String,
    pub customer_id: String,
    pub journey: Option<String>,
    pub step: Option<String>,
    pub last_intent: Option<String>,
    pub cart: serde_json::Value,
    pub order_id: Option<String>,
    pub last_question: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffTicket {
    pub id: String,
    pub reason: String,
    /// Customer-facing expectation, e.g. "within 2 hours".
    pub expected_timeline: String,
}

/// Create a handoff record. The expected timeline comes from the tenant's
/// handoff policy; the caller flips the conversation into handoff status.
pub fn create_ticket(
    conn: &Connection,
    ctx: &ToolContext,
    customer_id: &str,
    reason: &str,
    snapshot: &HandoffSnapshot,
    handoff_policy: &str,
) -> ToolResult<HandoffTicket> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO handoff_tickets
         (id, tenant_id, conversation_id, customer_id, reason, snapshot, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
        params![
            id,
            ctx.tenant_id,
            ctx.conversation_id,
            customer_id,
            reason,
            serde_json::to_string(snapshot)
                .map_err(|e| ToolError::Permanent(e.to_string()))?,
            now,
        ],
    )
    .map_err(ToolError::from_sqlite)?;

    info!(
        tenant_id = %ctx.tenant_id,
        conversation_id = %ctx.conversation_id,
        ticket_id = %id,
        reason,
        "handoff ticket created"
    );

    Ok(HandoffTicket {
        id,
        reason: reason.to_string(),
        expected_timeline: expected_timeline(handoff_policy).to_string(),
    })
}

pub fn close_ticket(conn: &Connection, tenant_id: &str, ticket_id: &str) -> ToolResult<()> {
    let n = conn
        .execute(
            "UPDATE handoff_tickets SET status = 'closed', updated_at = ?3
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, ticket_id, Utc::now().to_rfc3339()],
        )
        .map_err(ToolError::from_sqlite)?;
    if n == 0 {
        return Err(ToolError::NotFound(format!("handoff ticket {}", ticket_id)));
    }
    Ok(())
}

fn expected_timeline(handoff_policy: &str) -> &'static str {
    match handoff_policy {
        "always_on" => "shortly",
        "next_business_day" => "by the next business day",
        _ => "within business hours today",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    #[test]
    fn ticket_freezes_snapshot() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let ctx = ToolContext::new("t1", "req-1", "conv-1");
        let snapshot = HandoffSnapshot {
            tenant_id: "t1".into(),
            customer_id: "c1".into(),
            journey: Some("payments".into()),
            step: Some("awaiting_confirmation".into()),
            last_intent: Some("MAKE_PAYMENT".into()),
            cart: serde_json::json!([{"item_id": "p1", "quantity": 1}]),
            order_id: Some("ord-1".into()),
            last_question: Some("Confirm KES 500?".into()),
        };
        let ticket =
            create_ticket(&conn, &ctx, "c1", "payment dispute", &snapshot, "always_on").unwrap();
        assert_eq!(ticket.expected_timeline, "shortly");

        let stored: String = conn
            .query_row(
                "SELECT snapshot FROM handoff_tickets WHERE id = ?1",
                params![ticket.id],
                |row| row.get(0),
            )
            .unwrap();
        let parsed: HandoffSnapshot = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed.order_id.as_deref(), Some("ord-1"));
    }

    #[test]
    fn closing_unknown_ticket_is_not_found() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        assert!(matches!(
            close_ticket(&conn, "t1", "missing"),
            Err(ToolError::NotFound(_))
        ));
    }
}
