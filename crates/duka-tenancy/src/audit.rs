use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use uuid::Uuid;

use duka_core::types::WebhookStatus;

use crate::crypto::SecretBox;
use crate::error::Result;

/// JSON keys whose values are masked before an audit row is written.
const MASKED_KEYS: &[&str] = &[
    "password",
    "password_hash",
    "auth_token",
    "webhook_secret",
    "api_key",
    "session_token",
    "phone_e164",
];

/// One forensic audit record. `before`/`after` diffs are masked on write.
pub struct AuditEntry {
    pub tenant_id: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub target_kind: String,
    pub target_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Append an audit row. Never fails the caller's business operation on
/// content grounds — masking is applied, not validation.
pub fn record(conn: &Connection, entry: AuditEntry) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    let before = entry.before.map(|v| mask_secrets(v).to_string());
    let after = entry.after.map(|v| mask_secrets(v).to_string());
    conn.execute(
        "INSERT INTO audit_log
         (id, tenant_id, actor_id, action, target_kind, target_id,
          before_json, after_json, request_id, ip, user_agent, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        params![
            id,
            entry.tenant_id,
            entry.actor_id,
            entry.action,
            entry.target_kind,
            entry.target_id,
            before,
            after,
            entry.request_id,
            entry.ip,
            entry.user_agent,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

/// Recursively replace sensitive values with "***". Key match is
/// case-insensitive substring, so `twilio_auth_token` is caught by
/// `auth_token`.
pub fn mask_secrets(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let masked = map
                .into_iter()
                .map(|(k, v)| {
                    let lower = k.to_lowercase();
                    if MASKED_KEYS.iter().any(|m| lower.contains(m)) {
                        (k, Value::String("***".to_string()))
                    } else {
                        (k, mask_secrets(v))
                    }
                })
                .collect();
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(mask_secrets).collect()),
        other => other,
    }
}

/// Record a gateway delivery. The raw payload is stored encrypted only.
pub fn webhook_log_insert(
    conn: &Connection,
    crypto: &SecretBox,
    tenant_id: Option<&str>,
    provider: &str,
    provider_message_id: Option<&str>,
    status: WebhookStatus,
    payload: Option<&str>,
) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    let payload_enc = match payload {
        Some(p) => Some(crypto.encrypt(p)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO webhook_log
         (id, tenant_id, provider, provider_message_id, status, payload_enc, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            id,
            tenant_id,
            provider,
            provider_message_id,
            status.to_string(),
            payload_enc,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

pub fn webhook_log_set_status(
    conn: &Connection,
    log_id: &str,
    status: WebhookStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE webhook_log SET status = ?2, error = ?3 WHERE id = ?1",
        params![log_id, status.to_string(), error],
    )?;
    Ok(())
}

/// Recent audit rows for the operator surface, newest first.
pub fn list_audit(
    conn: &Connection,
    tenant_id: &str,
    limit: usize,
) -> Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, actor_id, action, target_kind, target_id,
                before_json, after_json, request_id, created_at
         FROM audit_log WHERE tenant_id = ?1
         ORDER BY created_at DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![tenant_id, limit as i64], |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "actor_id": row.get::<_, Option<String>>(1)?,
            "action": row.get::<_, String>(2)?,
            "target_kind": row.get::<_, String>(3)?,
            "target_id": row.get::<_, Option<String>>(4)?,
            "before": row.get::<_, Option<String>>(5)?,
            "after": row.get::<_, Option<String>>(6)?,
            "request_id": row.get::<_, Option<String>>(7)?,
            "created_at": row.get::<_, String>(8)?,
        }))
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
