use std::sync::{Arc, Mutex};

use axum::{
    routing::{get, post, put},
    Router,
};
use rusqlite::Connection;

use duka_core::config::DukaConfig;
use duka_outbound::Deliverer;
use duka_sessions::StateStore;
use duka_tenancy::crypto::SecretBox;
use duka_tenancy::{ScopeResolver, TenantStore};
use duka_tools::Tools;
use duka_worker::engine::QueueHandle;

/// Central shared state — passed as Arc<AppState> to all handlers.
pub struct AppState {
    pub config: DukaConfig,
    pub db: Arc<Mutex<Connection>>,
    pub crypto: Arc<SecretBox>,
    pub tenants: Arc<TenantStore>,
    pub resolver: Arc<ScopeResolver>,
    pub store: Arc<StateStore>,
    pub tools: Arc<Tools>,
    pub deliverer: Arc<Deliverer>,
    pub queue: QueueHandle,
    /// Inbound webhook dedup keys, TTL ≥ the gateway's retry window.
    pub dedup: duka_cache::TtlCache<()>,
    /// Suppression window for the subscription-inactive auto-reply.
    pub subgate: duka_cache::TtlCache<()>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Assemble the full router. The webhook and status-callback routes accept
/// gateway traffic (signature-authenticated); everything under /api/v1 is
/// the operator surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/webhooks/twilio", post(crate::http::webhook::inbound))
        .route(
            "/webhooks/twilio/status",
            post(crate::http::webhook::delivery_status),
        )
        .route(
            "/webhooks/twilio/{tenant_slug}",
            post(crate::http::webhook::inbound_with_slug),
        )
        .route("/api/v1/auth/login", post(crate::http::operators::login))
        .route(
            "/api/v1/products",
            get(crate::http::operators::list_products).post(crate::http::operators::create_product),
        )
        .route(
            "/api/v1/products/{id}",
            put(crate::http::operators::update_product),
        )
        .route(
            "/api/v1/conversations",
            get(crate::http::operators::list_conversations),
        )
        .route(
            "/api/v1/conversations/{id}/claim",
            post(crate::http::operators::claim_conversation),
        )
        .route(
            "/api/v1/conversations/{id}/release",
            post(crate::http::operators::release_conversation),
        )
        .route(
            "/api/v1/withdrawals",
            post(crate::http::operators::initiate_withdrawal),
        )
        .route(
            "/api/v1/withdrawals/{id}/approve",
            post(crate::http::operators::approve_withdrawal),
        )
        .route(
            "/api/v1/team/overrides",
            post(crate::http::operators::set_override),
        )
        .route(
            "/api/v1/team/overrides/clear",
            post(crate::http::operators::clear_override),
        )
        .route(
            "/api/v1/team/roles/assign",
            post(crate::http::operators::assign_role),
        )
        .route("/api/v1/audit", get(crate::http::operators::list_audit))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
