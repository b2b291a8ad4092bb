use serde::{Deserialize, Serialize};

use duka_core::types::TenantStatus;

/// Decrypted gateway credentials for one tenant. Never serialized back out;
/// lives only in memory for the duration of a request or turn.
#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    pub sender_number: String,
    pub account_sid: String,
    pub auth_token: String,
    pub webhook_secret: String,
}

/// Persona and runtime flags injected into every conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPersona {
    pub bot_name: String,
    pub bot_intro: String,
    pub tone_style: String,
    pub default_language: String,
    pub allowed_languages: Vec<String>,
    pub max_chattiness_level: u8,
    pub catalog_link_base: Option<String>,
    pub payments_enabled: bool,
    pub handoff_policy: String,
}

/// One isolated business. Credentials stay encrypted on this struct; use
/// `TenantStore::credentials` to get the decrypted form.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub status: TenantStatus,
    pub sender_number_enc: Option<String>,
    pub account_sid_enc: Option<String>,
    pub auth_token_enc: Option<String>,
    pub webhook_secret_enc: Option<String>,
    pub timezone: String,
    /// Offset used for quiet-hours math; kept denormalized so the send path
    /// does not need a tz database lookup.
    pub utc_offset_minutes: i32,
    pub quiet_start_hour: Option<u8>,
    pub quiet_end_hour: Option<u8>,
    pub tier: String,
    pub subscription_waived: bool,
    pub persona: TenantPersona,
    pub daily_message_limit: Option<u32>,
    pub kb_score_threshold: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Global operator identity (shared across tenants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub totp_enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Revoked,
}

impl std::fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Revoked => "revoked",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for InviteStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InviteStatus::Pending),
            "accepted" => Ok(InviteStatus::Accepted),
            "revoked" => Ok(InviteStatus::Revoked),
            other => Err(format!("unknown invite status: {}", other)),
        }
    }
}

/// Association between a User and a Tenant.
#[derive(Debug, Clone)]
pub struct TenantUser {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub invite_status: InviteStatus,
    pub is_active: bool,
    pub last_seen_at: Option<String>,
}

impl TenantUser {
    /// Only accepted, active memberships may act.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.invite_status == InviteStatus::Accepted
    }
}

/// Fully resolved request context attached to every operator request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: String,
    pub tenant_user_id: String,
    pub user_id: String,
    pub scopes: std::collections::BTreeSet<String>,
    pub request_id: String,
    /// Version of the scope cache this context was computed against.
    pub scope_version: u64,
}

impl RequestContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}
