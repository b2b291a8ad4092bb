use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use duka_core::error::DukaError;
use duka_tenancy::types::RequestContext;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

const SESSION_TTL_SECS: i64 = 12 * 3600;

/// Who is calling an operator endpoint.
pub enum Caller {
    /// A logged-in user with resolved scopes.
    Operator(RequestContext),
    /// A tenant-scoped API key. Bypasses RBAC; restricted to webhook and
    /// automation routes by the router layout, not by scopes.
    ApiKey { tenant_id: String },
}

/// Mint a session token: `user_id.expiry.hex(hmac(user_id.expiry))`.
pub fn issue_session_token(signing_key: &str, user_id: &str) -> String {
    let expiry = Utc::now().timestamp() + SESSION_TTL_SECS;
    let body = format!("{}.{}", user_id, expiry);
    let sig = sign(signing_key, &body);
    format!("{}.{}", body, sig)
}

/// Verify a session token in constant time and return the user id.
pub fn verify_session_token(signing_key: &str, token: &str) -> Result<String, DukaError> {
    let mut parts = token.rsplitn(2, '.');
    let sig_hex = parts.next().ok_or(DukaError::InvalidApiKey)?;
    let body = parts.next().ok_or(DukaError::InvalidApiKey)?;

    let sig = hex::decode(sig_hex).map_err(|_| DukaError::InvalidApiKey)?;
    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    mac.verify_slice(&sig).map_err(|_| DukaError::InvalidApiKey)?;

    let (user_id, expiry) = body.split_once('.').ok_or(DukaError::InvalidApiKey)?;
    let expiry: i64 = expiry.parse().map_err(|_| DukaError::InvalidApiKey)?;
    if expiry < Utc::now().timestamp() {
        return Err(DukaError::InvalidApiKey);
    }
    Ok(user_id.to_string())
}

fn sign(signing_key: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Authenticate an operator request: `X-Tenant-ID` header plus either a
/// bearer session token (users, RBAC-resolved) or `X-API-Key`.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, DukaError> {
    let tenant_id = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(DukaError::TenantNotFound)?
        .to_string();

    // Tenant must exist before anything else is considered.
    state
        .tenants
        .get(&tenant_id)
        .map_err(DukaError::from)?
        .ok_or(DukaError::TenantNotFound)?;

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let key_hash = hash_api_key(key);
        let conn = state.db.lock().unwrap();
        let valid: Option<String> = conn
            .query_row(
                "SELECT tenant_id FROM api_keys
                 WHERE key_hash = ?1 AND is_active = 1",
                rusqlite::params![key_hash],
                |row| row.get(0),
            )
            .ok();
        return match valid {
            Some(t) if t == tenant_id => Ok(Caller::ApiKey { tenant_id }),
            _ => Err(DukaError::InvalidApiKey),
        };
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(DukaError::InvalidApiKey)?;
    let user_id = verify_session_token(&state.config.security.session_signing_key, token)?;

    let ctx = state
        .resolver
        .resolve_context(&tenant_id, &user_id)
        .map_err(DukaError::from)?;
    Ok(Caller::Operator(ctx))
}

/// Operator-only guard with scope enforcement.
pub fn require_operator(
    state: &AppState,
    headers: &HeaderMap,
    scopes: &[&str],
) -> Result<RequestContext, DukaError> {
    match authenticate(state, headers)? {
        Caller::Operator(ctx) => {
            state
                .resolver
                .requires_scopes(&ctx, scopes)
                .map_err(DukaError::from)?;
            Ok(ctx)
        }
        Caller::ApiKey { .. } => Err(DukaError::InsufficientPermissions {
            missing: "session authentication (API keys cannot use operator endpoints)".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "kR9!mZ2@pQ7#wX4$vB6%nC8^dF1&gH3*";

    #[test]
    fn session_token_round_trip() {
        let token = issue_session_token(KEY, "user-1");
        assert_eq!(verify_session_token(KEY, &token).unwrap(), "user-1");
    }

    #[test]
    fn tampered_token_rejected() {
        let token = issue_session_token(KEY, "user-1");
        let tampered = token.replace("user-1", "user-2");
        assert!(verify_session_token(KEY, &tampered).is_err());
    }

    #[test]
    fn wrong_key_rejected() {
        let token = issue_session_token(KEY, "user-1");
        assert!(verify_session_token("another-key-another-key-another!", &token).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let expiry = Utc::now().timestamp() - 10;
        let body = format!("user-1.{}", expiry);
        let token = format!("{}.{}", body, sign(KEY, &body));
        assert!(verify_session_token(KEY, &token).is_err());
    }
}
