//! Operator REST surface. Every handler resolves the caller through the
//! scope resolver and declares its required scopes up front; object-level
//! access additionally re-checks tenant ownership inside the repositories.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use duka_commerce::{catalog, wallet};
use duka_core::error::DukaError;
use duka_sessions::conversations;
use duka_tenancy::audit::{self, AuditEntry};
use duka_tenancy::users;

use crate::app::AppState;
use crate::auth;
use crate::http::errors::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// POST /api/v1/auth/login — issues a session token for operator calls.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let user = {
        let conn = state.db.lock().unwrap();
        users::find_user_by_email(&conn, &req.email)?
    };
    let Some(user) = user else {
        return Err(ApiError(DukaError::InvalidApiKey));
    };
    if !user.is_active || !users::verify_password(&user, &req.password) {
        return Err(ApiError(DukaError::InvalidApiKey));
    }
    let token = auth::issue_session_token(&state.config.security.session_signing_key, &user.id);
    Ok(Json(json!({"token": token, "user_id": user.id})))
}

// ── catalog ──────────────────────────────────────────────────────────────────

pub async fn list_products(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["catalog:view"])?;
    let conn = state.db.lock().unwrap();
    let result = catalog::search(
        &conn,
        &ctx.tenant_id,
        "",
        &catalog::SearchFilters::default(),
    )?;
    Ok(Json(json!({
        "items": result.items,
        "total": result.total_estimate,
    })))
}

#[derive(Deserialize)]
pub struct ProductBody {
    name: String,
    #[serde(default)]
    description: String,
    category: Option<String>,
    price_cents: i64,
    #[serde(default = "default_true")]
    in_stock: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create_product(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ProductBody>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["catalog:edit"])?;
    let conn = state.db.lock().unwrap();
    let product = catalog::create_product(
        &conn,
        &ctx.tenant_id,
        &body.name,
        &body.description,
        body.category.as_deref(),
        body.price_cents,
    )?;
    audit::record(
        &conn,
        AuditEntry {
            tenant_id: ctx.tenant_id.clone(),
            actor_id: Some(ctx.user_id.clone()),
            action: "product.create".into(),
            target_kind: "product".into(),
            target_id: Some(product.id.clone()),
            before: None,
            after: Some(serde_json::to_value(&product)?),
            request_id: Some(ctx.request_id.clone()),
            ip: None,
            user_agent: None,
        },
    )?;
    Ok(Json(serde_json::to_value(product)?))
}

/// PUT /api/v1/products/{id} — records a before/after audit diff.
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
    Json(body): Json<ProductBody>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["catalog:edit"])?;
    let conn = state.db.lock().unwrap();

    let before = catalog::get_item(&conn, &ctx.tenant_id, &product_id)?.ok_or(
        DukaError::ResourceNotFound {
            kind: format!("product {}", product_id),
        },
    )?;
    catalog::update_product(
        &conn,
        &ctx.tenant_id,
        &product_id,
        &body.name,
        &body.description,
        body.price_cents,
        body.in_stock,
    )?;
    let after = catalog::get_item(&conn, &ctx.tenant_id, &product_id)?;

    audit::record(
        &conn,
        AuditEntry {
            tenant_id: ctx.tenant_id.clone(),
            actor_id: Some(ctx.user_id.clone()),
            action: "product.update".into(),
            target_kind: "product".into(),
            target_id: Some(product_id),
            before: Some(serde_json::to_value(&before)?),
            after: Some(serde_json::to_value(&after)?),
            request_id: Some(ctx.request_id.clone()),
            ip: None,
            user_agent: None,
        },
    )?;
    Ok(Json(serde_json::to_value(after)?))
}

// ── conversations (handoff ownership) ────────────────────────────────────────

#[derive(Deserialize)]
pub struct InboxQuery {
    status: Option<String>,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<InboxQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["inbox:view"])?;
    let status: Option<duka_core::types::ConversationStatus> = query
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(DukaError::InvalidInput)?;
    let conn = state.db.lock().unwrap();
    let rows = conversations::list_for_tenant(&conn, &ctx.tenant_id, status, 100)?;
    Ok(Json(json!({"conversations": rows})))
}

pub async fn claim_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["inbox:respond"])?;
    let conn = state.db.lock().unwrap();
    conversations::claim(&conn, &ctx.tenant_id, &conversation_id, &ctx.user_id).map_err(|_| {
        DukaError::ResourceNotFound {
            kind: format!("handoff conversation {}", conversation_id),
        }
    })?;
    Ok(Json(json!({"claimed": true})))
}

pub async fn release_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["inbox:respond"])?;
    let conn = state.db.lock().unwrap();
    conversations::release(&conn, &ctx.tenant_id, &conversation_id).map_err(|_| {
        DukaError::ResourceNotFound {
            kind: format!("conversation {}", conversation_id),
        }
    })?;
    Ok(Json(json!({"released": true})))
}

// ── withdrawals (four-eyes) ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct WithdrawalRequest {
    amount_cents: i64,
}

pub async fn initiate_withdrawal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<WithdrawalRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["finance:withdraw:initiate"])?;
    let mut conn = state.db.lock().unwrap();
    let txn = wallet::initiate_withdrawal(
        &mut conn,
        &ctx.tenant_id,
        body.amount_cents,
        state.config.billing.min_withdrawal_cents,
        &ctx.user_id,
    )?;
    audit::record(
        &conn,
        AuditEntry {
            tenant_id: ctx.tenant_id.clone(),
            actor_id: Some(ctx.user_id.clone()),
            action: "withdrawal.initiate".into(),
            target_kind: "transaction".into(),
            target_id: Some(txn.id.clone()),
            before: None,
            after: Some(json!({
                "amount_cents": body.amount_cents,
                "initiator_id": ctx.user_id,
            })),
            request_id: Some(ctx.request_id.clone()),
            ip: None,
            user_agent: None,
        },
    )?;
    Ok(Json(serde_json::to_value(txn)?))
}

pub async fn approve_withdrawal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["finance:withdraw:approve"])?;

    let initiator = {
        let conn = state.db.lock().unwrap();
        wallet::get_transaction(&conn, &ctx.tenant_id, &transaction_id)?
            .and_then(|t| t.initiated_by)
            .ok_or(DukaError::ResourceNotFound {
                kind: format!("transaction {}", transaction_id),
            })?
    };

    // Four-eyes: distinct, existing, active users — violations are
    // audit-logged with both ids before the 409 goes out.
    state.resolver.validate_four_eyes(
        &ctx.tenant_id,
        "withdrawal.approve",
        &initiator,
        &ctx.user_id,
        &ctx.request_id,
    )?;

    let conn = state.db.lock().unwrap();
    let txn = wallet::approve_withdrawal(&conn, &ctx.tenant_id, &transaction_id, &ctx.user_id)?;
    audit::record(
        &conn,
        AuditEntry {
            tenant_id: ctx.tenant_id.clone(),
            actor_id: Some(ctx.user_id.clone()),
            action: "withdrawal.approve".into(),
            target_kind: "transaction".into(),
            target_id: Some(txn.id.clone()),
            before: None,
            after: Some(json!({
                "initiator_id": initiator,
                "approver_id": ctx.user_id,
            })),
            request_id: Some(ctx.request_id.clone()),
            ip: None,
            user_agent: None,
        },
    )?;
    Ok(Json(serde_json::to_value(txn)?))
}

// ── team / RBAC ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct OverrideRequest {
    tenant_user_id: String,
    permission: String,
    granted: bool,
    reason: Option<String>,
}

pub async fn set_override(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OverrideRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["team:manage"])?;
    require_same_tenant_membership(&state, &ctx.tenant_id, &body.tenant_user_id)?;

    state.resolver.set_override(
        &body.tenant_user_id,
        &body.permission,
        body.granted,
        body.reason.as_deref(),
    )?;
    let conn = state.db.lock().unwrap();
    audit::record(
        &conn,
        AuditEntry {
            tenant_id: ctx.tenant_id.clone(),
            actor_id: Some(ctx.user_id.clone()),
            action: "rbac.override.set".into(),
            target_kind: "tenant_user".into(),
            target_id: Some(body.tenant_user_id.clone()),
            before: None,
            after: Some(json!({
                "permission": body.permission,
                "granted": body.granted,
                "reason": body.reason,
            })),
            request_id: Some(ctx.request_id.clone()),
            ip: None,
            user_agent: None,
        },
    )?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct ClearOverrideRequest {
    tenant_user_id: String,
    permission: String,
}

pub async fn clear_override(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ClearOverrideRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["team:manage"])?;
    require_same_tenant_membership(&state, &ctx.tenant_id, &body.tenant_user_id)?;

    state
        .resolver
        .clear_override(&body.tenant_user_id, &body.permission)?;
    let conn = state.db.lock().unwrap();
    audit::record(
        &conn,
        AuditEntry {
            tenant_id: ctx.tenant_id.clone(),
            actor_id: Some(ctx.user_id.clone()),
            action: "rbac.override.clear".into(),
            target_kind: "tenant_user".into(),
            target_id: Some(body.tenant_user_id.clone()),
            before: Some(json!({"permission": body.permission})),
            after: None,
            request_id: Some(ctx.request_id.clone()),
            ip: None,
            user_agent: None,
        },
    )?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    tenant_user_id: String,
    role_name: String,
}

pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AssignRoleRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["team:manage"])?;
    require_same_tenant_membership(&state, &ctx.tenant_id, &body.tenant_user_id)?;

    let role_id = {
        let conn = state.db.lock().unwrap();
        duka_tenancy::rbac::find_role(&conn, &ctx.tenant_id, &body.role_name)?.ok_or(
            DukaError::ResourceNotFound {
                kind: format!("role {}", body.role_name),
            },
        )?
    };
    state.resolver.assign_role(&body.tenant_user_id, &role_id)?;

    let conn = state.db.lock().unwrap();
    audit::record(
        &conn,
        AuditEntry {
            tenant_id: ctx.tenant_id.clone(),
            actor_id: Some(ctx.user_id.clone()),
            action: "rbac.role.assign".into(),
            target_kind: "tenant_user".into(),
            target_id: Some(body.tenant_user_id.clone()),
            before: None,
            after: Some(json!({"role": body.role_name})),
            request_id: Some(ctx.request_id.clone()),
            ip: None,
            user_agent: None,
        },
    )?;
    Ok(Json(json!({"ok": true})))
}

pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let ctx = auth::require_operator(&state, &headers, &["audit:view"])?;
    let conn = state.db.lock().unwrap();
    let rows = audit::list_audit(&conn, &ctx.tenant_id, 100)?;
    Ok(Json(json!({"entries": rows})))
}

/// Object-level tenant check: the referenced membership must belong to the
/// caller's tenant, otherwise the resource does not exist for them.
fn require_same_tenant_membership(
    state: &AppState,
    tenant_id: &str,
    tenant_user_id: &str,
) -> Result<(), ApiError> {
    let conn = state.db.lock().unwrap();
    let membership = users::get_membership_by_id(&conn, tenant_user_id)?;
    match membership {
        Some(m) if m.tenant_id == tenant_id => Ok(()),
        _ => Err(ApiError(DukaError::ResourceNotFound {
            kind: format!("tenant_user {}", tenant_user_id),
        })),
    }
}
