// Operator-surface scenarios: the deny-override round trip on PUT
// /products/{id} and the four-eyes withdrawal sequence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rusqlite::Connection;
use tower::ServiceExt;

use duka_cache::LockRegistry;
use duka_core::config::{
    BillingConfig, DatabaseConfig, DukaConfig, HttpConfig, LlmConfig, MessagingConfig,
    PipelineConfig, SecurityConfig,
};
use duka_gateway::app::{build_router, AppState};
use duka_gateway::auth;
use duka_outbound::delivery::{GatewayError, WaGateway};
use duka_outbound::{Deliverer, WaPayload};
use duka_sessions::StateStore;
use duka_tenancy::crypto::SecretBox;
use duka_tenancy::rbac;
use duka_tenancy::tenants::NewTenant;
use duka_tenancy::types::GatewayCredentials;
use duka_tenancy::users;
use duka_tenancy::{ScopeResolver, TenantStore};
use duka_tools::payments::{PaymentRail, RailRequest, RailResponse};
use duka_tools::{KnowledgeStore, ToolResult, Tools};
use duka_worker::{Queue, WorkerEngine};

struct NullGateway;

#[async_trait::async_trait]
impl WaGateway for NullGateway {
    async fn send(
        &self,
        _creds: &GatewayCredentials,
        _to: &str,
        _payload: &WaPayload,
    ) -> Result<String, GatewayError> {
        Ok("SM0000".into())
    }
}

struct NoopRail;

#[async_trait::async_trait]
impl PaymentRail for NoopRail {
    async fn initiate_stk_push(&self, _req: &RailRequest) -> ToolResult<RailResponse> {
        unreachable!()
    }
    async fn c2b_instructions(&self, _req: &RailRequest) -> ToolResult<RailResponse> {
        unreachable!()
    }
    async fn create_checkout(&self, _req: &RailRequest) -> ToolResult<RailResponse> {
        unreachable!()
    }
}

const SIGNING_KEY: &str = "kR9!mZ2@pQ7#wX4$vB6%nC8^dF1&gH3*";

struct Harness {
    state: Arc<AppState>,
    tenant_id: String,
}

fn harness() -> Harness {
    let conn = Connection::open_in_memory().unwrap();
    duka_tenancy::db::init_db(&conn).unwrap();
    duka_sessions::db::init_db(&conn).unwrap();
    duka_commerce::db::init_db(&conn).unwrap();
    duka_tools::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let config = DukaConfig {
        database: DatabaseConfig::default(),
        http: HttpConfig::default(),
        security: SecurityConfig {
            encryption_key: "a3f1".repeat(16),
            session_signing_key: SIGNING_KEY.to_string(),
        },
        llm: LlmConfig {
            api_key: "sk-test".into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            timeout_secs: 20,
        },
        messaging: MessagingConfig::default(),
        pipeline: PipelineConfig::default(),
        billing: BillingConfig::default(),
    };

    let crypto = Arc::new(SecretBox::new(&config.security.encryption_key_bytes().unwrap()).unwrap());
    let tenants = Arc::new(TenantStore::new(Arc::clone(&db), Arc::clone(&crypto)));
    let tenant = tenants
        .create(NewTenant {
            name: "Acme".into(),
            slug: "acme".into(),
            sender_number: "+254700000100".into(),
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
            webhook_secret: "sec".into(),
            timezone: "Africa/Nairobi".into(),
            utc_offset_minutes: 180,
        })
        .unwrap();
    {
        let conn = db.lock().unwrap();
        rbac::seed_tenant_roles(&conn, &tenant.id).unwrap();
    }

    let resolver = Arc::new(ScopeResolver::new(Arc::clone(&db)));
    let store = Arc::new(StateStore::new(
        Arc::clone(&db),
        Arc::new(LockRegistry::new()),
        Duration::from_secs(1800),
        Duration::from_secs(5),
    ));
    let kb = Arc::new(KnowledgeStore::new(Arc::clone(&db)));
    let tools = Arc::new(Tools::new(
        Arc::clone(&db),
        Arc::clone(&tenants),
        kb,
        Arc::new(NoopRail),
        Arc::clone(&crypto),
    ));
    let deliverer = Arc::new(Deliverer::new(Arc::new(NullGateway), 1000, (21, 8)));
    let engine = WorkerEngine::new(Arc::clone(&db), Queue::ALL.to_vec()).unwrap();
    let queue = engine.handle();

    let state = Arc::new(AppState {
        config,
        db,
        crypto,
        tenants,
        resolver,
        store,
        tools,
        deliverer,
        queue,
        dedup: duka_cache::TtlCache::new(),
        subgate: duka_cache::TtlCache::new(),
        started_at: chrono::Utc::now(),
    });
    Harness {
        state,
        tenant_id: tenant.id,
    }
}

impl Harness {
    /// Create an accepted member with `role`, return (user_id, token,
    /// tenant_user_id).
    fn operator(&self, email: &str, role: &str) -> (String, String, String) {
        let conn = self.state.db.lock().unwrap();
        let user = users::create_user(&conn, email, "pw").unwrap();
        let membership = users::invite_member(&conn, &self.tenant_id, &user.id).unwrap();
        users::accept_invite(&conn, &self.tenant_id, &user.id).unwrap();
        let role_id = rbac::find_role(&conn, &self.tenant_id, role).unwrap().unwrap();
        rbac::assign_role(&conn, &membership.id, &role_id).unwrap();
        drop(conn);
        let token = auth::issue_session_token(SIGNING_KEY, &user.id);
        (user.id, token, membership.id)
    }

    async fn request(
        &self,
        method: &str,
        uri: &str,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", &self.tenant_id)
            .header("authorization", format!("Bearer {}", token));
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = build_router(Arc::clone(&self.state))
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

#[tokio::test]
async fn deny_override_blocks_then_clearing_restores_with_audit_diff() {
    let h = harness();
    let (_, manager_token, manager_tu) = h.operator("mgr@acme.co.ke", "Catalog Manager");
    let (_, owner_token, _) = h.operator("owner@acme.co.ke", "Owner");

    // Seed one product as the owner.
    let (status, product) = h
        .request(
            "POST",
            "/api/v1/products",
            &owner_token,
            Some(serde_json::json!({"name": "Laptop", "price_cents": 4_500_000})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let product_id = product["id"].as_str().unwrap().to_string();

    // Deny catalog:edit for the manager despite the role grant.
    let (status, _) = h
        .request(
            "POST",
            "/api/v1/team/overrides",
            &owner_token,
            Some(serde_json::json!({
                "tenant_user_id": manager_tu,
                "permission": "catalog:edit",
                "granted": false,
                "reason": "probation",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let update = serde_json::json!({"name": "Laptop Pro", "price_cents": 5_000_000});
    let (status, body) = h
        .request(
            "PUT",
            &format!("/api/v1/products/{}", product_id),
            &manager_token,
            Some(update.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_PERMISSIONS");

    // Remove the deny; the role grant applies again.
    let (status, _) = h
        .request(
            "POST",
            "/api/v1/team/overrides/clear",
            &owner_token,
            Some(serde_json::json!({
                "tenant_user_id": manager_tu,
                "permission": "catalog:edit",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .request(
            "PUT",
            &format!("/api/v1/products/{}", product_id),
            &manager_token,
            Some(update),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // The successful update recorded a before/after diff.
    let conn = h.state.db.lock().unwrap();
    let (before, after): (String, String) = conn
        .query_row(
            "SELECT before_json, after_json FROM audit_log
             WHERE action = 'product.update' ORDER BY created_at DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert!(before.contains("Laptop"));
    assert!(after.contains("Laptop Pro"));
}

#[tokio::test]
async fn withdrawal_four_eyes_sequence() {
    let h = harness();
    let (_, finance1_token, _) = h.operator("f1@acme.co.ke", "Finance");
    let (_, finance2_token, _) = h.operator("f2@acme.co.ke", "Finance");

    // Fund the wallet.
    {
        let mut conn = h.state.db.lock().unwrap();
        duka_commerce::wallet::record_customer_payment(&mut conn, &h.tenant_id, 1_000_000, "ref")
            .unwrap();
    }
    let funded = {
        let conn = h.state.db.lock().unwrap();
        duka_commerce::wallet::balance(&conn, &h.tenant_id).unwrap()
    };

    // Initiate: debit is immediate, transaction pending.
    let (status, txn) = h
        .request(
            "POST",
            "/api/v1/withdrawals",
            &finance1_token,
            Some(serde_json::json!({"amount_cents": 500_000})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let txn_id = txn["id"].as_str().unwrap().to_string();
    assert_eq!(txn["status"], "pending");
    {
        let conn = h.state.db.lock().unwrap();
        assert_eq!(
            duka_commerce::wallet::balance(&conn, &h.tenant_id).unwrap(),
            funded - 500_000
        );
    }

    // Same-user approval: FOUR_EYES_VIOLATION, no state change.
    let (status, body) = h
        .request(
            "POST",
            &format!("/api/v1/withdrawals/{}/approve", txn_id),
            &finance1_token,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "FOUR_EYES_VIOLATION");
    {
        let conn = h.state.db.lock().unwrap();
        let txn = duka_commerce::wallet::get_transaction(&conn, &h.tenant_id, &txn_id)
            .unwrap()
            .unwrap();
        assert_eq!(txn.status, duka_commerce::types::TransactionStatus::Pending);
    }

    // Second approver succeeds.
    let (status, txn) = h
        .request(
            "POST",
            &format!("/api/v1/withdrawals/{}/approve", txn_id),
            &finance2_token,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(txn["status"], "completed");

    // External payout failure re-credits the amount.
    {
        let mut conn = h.state.db.lock().unwrap();
        duka_commerce::wallet::fail_withdrawal(&mut conn, &h.tenant_id, &txn_id, "payout 502")
            .unwrap();
        assert_eq!(
            duka_commerce::wallet::balance(&conn, &h.tenant_id).unwrap(),
            funded
        );
    }

    // Both audit entries carry both ids.
    let conn = h.state.db.lock().unwrap();
    let violation_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM audit_log WHERE action LIKE '%four_eyes_violation'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(violation_count, 1);
    let approve_after: String = conn
        .query_row(
            "SELECT after_json FROM audit_log WHERE action = 'withdrawal.approve'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert!(approve_after.contains("initiator_id"));
    assert!(approve_after.contains("approver_id"));
}

#[tokio::test]
async fn api_key_cannot_reach_operator_endpoints() {
    let h = harness();
    // Register an API key for the tenant.
    {
        let conn = h.state.db.lock().unwrap();
        conn.execute(
            "INSERT INTO api_keys (id, tenant_id, key_hash, label, created_at)
             VALUES ('k1', ?1, ?2, 'automation', ?3)",
            rusqlite::params![
                h.tenant_id,
                auth::hash_api_key("raw-key"),
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .unwrap();
    }

    let req = Request::builder()
        .method("GET")
        .uri("/api/v1/products")
        .header("x-tenant-id", &h.tenant_id)
        .header("x-api-key", "raw-key")
        .body(Body::empty())
        .unwrap();
    let resp = build_router(Arc::clone(&h.state)).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
