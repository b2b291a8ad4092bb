//! Gateway webhook intake.
//!
//! Everything here runs on the request path and must stay fast: resolve the
//! tenant, verify the signature, dedup, persist, enqueue. The conversational
//! turn itself happens on the `messaging` worker queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use duka_core::types::{MessageDirection, MessageKind, WebhookStatus};
use duka_outbound::WaPayload;
use duka_sessions::types::NewMessage;
use duka_sessions::{conversations, customers};
use duka_tenancy::audit::{webhook_log_insert, webhook_log_set_status};
use duka_tenancy::types::Tenant;
use duka_worker::Queue;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// POST /webhooks/twilio — tenant resolved by the recipient number.
pub async fn inbound(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    handle_inbound(&state, &headers, &body, None).await
}

/// POST /webhooks/twilio/{tenant_slug} — fallback tenant selector in the
/// URL for tenants sharing a provider number pool.
pub async fn inbound_with_slug(
    State(state): State<Arc<AppState>>,
    Path(tenant_slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    handle_inbound(&state, &headers, &body, Some(&tenant_slug)).await
}

async fn handle_inbound(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
    tenant_slug: Option<&str>,
) -> StatusCode {
    let provider = state.config.messaging.provider.clone();
    let form = parse_form(body);
    // Twilio prefixes WhatsApp participants with "whatsapp:".
    let from = form
        .get("From")
        .map(|f| f.strip_prefix("whatsapp:").unwrap_or(f).to_string())
        .unwrap_or_default();
    let to = form.get("To").cloned().unwrap_or_default();
    let text = form.get("Body").cloned().unwrap_or_default();
    let provider_message_id = form.get("MessageSid").cloned();
    let raw = String::from_utf8_lossy(body).to_string();

    // Tenant resolution: recipient number first, slug fallback.
    let tenant = match resolve_tenant(state, &to, tenant_slug) {
        Ok(Some(t)) => t,
        Ok(None) => {
            warn!(to = %to, "webhook for unresolvable tenant");
            log_unresolved(state, &provider, provider_message_id.as_deref(), &raw);
            return StatusCode::NOT_FOUND;
        }
        Err(e) => {
            warn!(error = %e, "tenant resolution failed");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    // Signature check under the tenant's webhook secret, constant time.
    if let Err(reason) = verify_signature(state, &tenant, headers, body) {
        warn!(tenant_id = %tenant.id, reason, "webhook signature rejected");
        let conn = state.db.lock().unwrap();
        let _ = webhook_log_insert(
            &conn,
            &state.crypto,
            Some(&tenant.id),
            &provider,
            provider_message_id.as_deref(),
            WebhookStatus::Unauthorized,
            Some(&raw),
        );
        return StatusCode::UNAUTHORIZED;
    }

    // Dedup: at-most-once downstream processing within the TTL.
    let dedup_key = dedup_key(
        state,
        &provider,
        provider_message_id.as_deref(),
        &from,
        &to,
        &text,
    );
    let ttl = Duration::from_secs(state.config.messaging.dedup_ttl_hours * 3600);
    if !state.dedup.put_if_absent(&dedup_key, (), ttl) {
        info!(tenant_id = %tenant.id, "duplicate webhook suppressed");
        let conn = state.db.lock().unwrap();
        let _ = webhook_log_insert(
            &conn,
            &state.crypto,
            Some(&tenant.id),
            &provider,
            provider_message_id.as_deref(),
            WebhookStatus::Duplicate,
            None,
        );
        return StatusCode::OK;
    }

    match accept_message(
        state,
        &tenant,
        &provider,
        provider_message_id.as_deref(),
        &from,
        &text,
        &raw,
    )
    .await
    {
        Ok(status) => status,
        Err(e) => {
            warn!(tenant_id = %tenant.id, error = %e, "webhook intake failed");
            // Release the dedup slot so the gateway's retry is not swallowed.
            state.dedup.remove(&dedup_key);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// The post-gate path: subscription check, persist, enqueue.
async fn accept_message(
    state: &AppState,
    tenant: &Tenant,
    provider: &str,
    provider_message_id: Option<&str>,
    from: &str,
    text: &str,
    raw: &str,
) -> Result<StatusCode, String> {
    let customer = {
        let conn = state.db.lock().unwrap();
        customers::get_or_create(&conn, &state.crypto, &tenant.id, from)
            .map_err(|e| e.to_string())?
    };

    // Subscription gate: inactive tenants get one polite auto-reply per
    // suppression window and no pipeline turn.
    if !tenant.status.is_serviceable() && !tenant.subscription_waived {
        {
            let conn = state.db.lock().unwrap();
            let _ = webhook_log_insert(
                &conn,
                &state.crypto,
                Some(&tenant.id),
                provider,
                provider_message_id,
                WebhookStatus::SubscriptionInactive,
                Some(raw),
            );
        }

        let gate_key = format!("subgate:{}:{}", tenant.id, customer.id);
        let window =
            Duration::from_secs(state.config.messaging.subscription_gate_suppress_hours * 3600);
        if state.subgate.put_if_absent(&gate_key, (), window) {
            if let Ok(creds) = state.tenants.credentials(tenant) {
                let _ = state
                    .deliverer
                    .send_turn(
                        tenant,
                        &creds,
                        &customer,
                        &format!("subgate:{}", customer.id),
                        0,
                        MessageKind::AutomatedTransactional,
                        &[WaPayload::Text {
                            body: "This business is temporarily unavailable. Please check \
                                   back later."
                                .to_string(),
                        }],
                    )
                    .await;
            }
        }
        // 200 so the gateway does not retry a delivery we chose not to serve.
        return Ok(StatusCode::OK);
    }

    let conn = state.db.lock().unwrap();
    let log_id = webhook_log_insert(
        &conn,
        &state.crypto,
        Some(&tenant.id),
        provider,
        provider_message_id,
        WebhookStatus::Pending,
        Some(raw),
    )
    .map_err(|e| e.to_string())?;

    let conversation =
        conversations::get_or_open(&conn, &tenant.id, &customer.id).map_err(|e| e.to_string())?;
    let message = conversations::append_message(
        &conn,
        NewMessage {
            tenant_id: &tenant.id,
            conversation_id: &conversation.id,
            direction: MessageDirection::In,
            kind: MessageKind::CustomerInbound,
            body: text,
            payload: None,
            provider_message_id,
            template_ref: None,
        },
    )
    .map_err(|e| e.to_string())?;
    drop(conn);

    state
        .queue
        .enqueue(
            Queue::Messaging,
            "process_inbound_message",
            &serde_json::json!({"message_id": message.id}),
            3,
            None,
            None,
        )
        .map_err(|e| e.to_string())?;

    let conn = state.db.lock().unwrap();
    webhook_log_set_status(&conn, &log_id, WebhookStatus::Success, None)
        .map_err(|e| e.to_string())?;

    info!(
        tenant_id = %tenant.id,
        conversation_id = %conversation.id,
        message_id = %message.id,
        "inbound message accepted"
    );
    Ok(StatusCode::OK)
}

/// POST /webhooks/twilio/status — delivery receipts for outbound messages.
pub async fn delivery_status(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    let form = parse_form(&body);
    let (Some(sid), Some(status)) = (form.get("MessageSid"), form.get("MessageStatus")) else {
        return StatusCode::BAD_REQUEST;
    };
    let conn = state.db.lock().unwrap();
    match conversations::set_delivery_status(&conn, sid, status) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "delivery status update failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn log_unresolved(state: &AppState, provider: &str, sid: Option<&str>, raw: &str) {
    let conn = state.db.lock().unwrap();
    let _ = webhook_log_insert(
        &conn,
        &state.crypto,
        None,
        provider,
        sid,
        WebhookStatus::Unauthorized,
        Some(raw),
    );
}

fn resolve_tenant(
    state: &AppState,
    to: &str,
    slug: Option<&str>,
) -> Result<Option<Tenant>, duka_tenancy::TenancyError> {
    if !to.is_empty() {
        // Twilio prefixes WhatsApp numbers with "whatsapp:".
        let number = to.strip_prefix("whatsapp:").unwrap_or(to);
        if let Some(t) = state.tenants.find_by_sender_number(number)? {
            return Ok(Some(t));
        }
    }
    match slug {
        Some(s) => state.tenants.find_by_slug(s),
        None => Ok(None),
    }
}

fn verify_signature(
    state: &AppState,
    tenant: &Tenant,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), &'static str> {
    let secret = state
        .tenants
        .credentials(tenant)
        .map_err(|_| "tenant has no webhook secret")?
        .webhook_secret;

    let sig_hex = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing signature header")?;
    let expected = hex::decode(sig_hex).map_err(|_| "signature is not valid hex")?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "invalid key length")?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| "signature mismatch")
}

/// Dedup identity: the provider message id when present (optionally also the
/// payload hash, per config), else a hash of (from, to, body, minute bucket).
fn dedup_key(
    state: &AppState,
    provider: &str,
    provider_message_id: Option<&str>,
    from: &str,
    to: &str,
    body: &str,
) -> String {
    match provider_message_id {
        Some(sid) if !state.config.messaging.dedup_include_payload_hash => {
            format!("wh:{}:{}", provider, sid)
        }
        Some(sid) => {
            let mut hasher = Sha256::new();
            hasher.update(body.as_bytes());
            format!(
                "wh:{}:{}:{}",
                provider,
                sid,
                hex::encode(&hasher.finalize()[..8])
            )
        }
        None => {
            let bucket = Utc::now().format("%Y%m%d%H%M");
            let mut hasher = Sha256::new();
            hasher.update(from.as_bytes());
            hasher.update(b"|");
            hasher.update(to.as_bytes());
            hasher.update(b"|");
            hasher.update(body.as_bytes());
            hasher.update(b"|");
            hasher.update(bucket.to_string().as_bytes());
            format!("wh:{}:{}", provider, hex::encode(&hasher.finalize()[..16]))
        }
    }
}

/// Minimal application/x-www-form-urlencoded parser.
fn parse_form(body: &Bytes) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    text.split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let decode = |s: &str| {
                urlencoding::decode(&s.replace('+', " "))
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            };
            Some((decode(k), decode(v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_parsing_decodes_percent_and_plus() {
        let body = Bytes::from_static(
            b"MessageSid=SM1&From=whatsapp%3A%2B254711000001&Body=Niaje%2C+una+laptop%3F",
        );
        let form = parse_form(&body);
        assert_eq!(form["MessageSid"], "SM1");
        assert_eq!(form["From"], "whatsapp:+254711000001");
        assert_eq!(form["Body"], "Niaje, una laptop?");
    }

    #[test]
    fn fallback_dedup_key_is_stable_within_a_minute() {
        // Direct hash construction mirrors dedup_key's no-sid arm.
        let mk = |body: &str| {
            let bucket = Utc::now().format("%Y%m%d%H%M").to_string();
            let mut hasher = Sha256::new();
            hasher.update(b"a|b|");
            hasher.update(body.as_bytes());
            hasher.update(b"|");
            hasher.update(bucket.as_bytes());
            hex::encode(&hasher.finalize()[..16])
        };
        assert_eq!(mk("hello"), mk("hello"));
        assert_ne!(mk("hello"), mk("world"));
    }
}
